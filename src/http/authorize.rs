//
// `/auth`, `/auth/{connector}`, `/auth/{connector}/login` routes (spec.md
// §4.4-§4.5, §6). Grounded on the teacher's `authorize` handler shape in
// `src/api/identity.rs`.
//
use std::sync::Arc;

use rocket::form::Form;
use rocket::{get, post, State};

use crate::error::Error;
use crate::flow::authorize::{self, AuthorizeParams};
use crate::flow::login;
use crate::flow::AppState;
use crate::http::pages::PageRenderer;
use crate::http::support::{ConnectorId, FlowOutcome};

type Pages = Arc<dyn PageRenderer>;

async fn start(state: &State<AppState>, pages: &State<Pages>, params: AuthorizeParams) -> Result<FlowOutcome, Error> {
    let req = authorize::parse_and_validate(state.storage.as_ref(), state.config, params).await?;
    let req_id = req.id.clone();
    state.storage.create_auth_request(req).await?;

    let connectors = state.storage.list_connectors().await?;
    Ok(FlowOutcome::Html(pages.connector_chooser(&req_id, &connectors)))
}

#[get("/auth?<params..>")]
pub async fn auth_get(state: &State<AppState>, pages: &State<Pages>, params: AuthorizeParams) -> Result<FlowOutcome, Error> {
    start(state, pages, params).await
}

#[post("/auth", data = "<form>")]
pub async fn auth_post(state: &State<AppState>, pages: &State<Pages>, form: Form<AuthorizeParams>) -> Result<FlowOutcome, Error> {
    start(state, pages, form.into_inner()).await
}

async fn dispatch(state: &State<AppState>, connector_id: &str, req_id: &str) -> Result<FlowOutcome, Error> {
    let req = state.storage.get_auth_request(req_id).await.map_err(|_| Error::display(rocket::http::Status::Gone, "unknown or expired request"))?;
    if req.is_expired(chrono::Utc::now()) {
        return Err(Error::display(rocket::http::Status::Gone, "session expired"));
    }
    login::dispatch_to_connector(state.storage.as_ref(), req_id, connector_id).await?;

    let connector = state.connectors.get(connector_id)?;
    let callback_url = format!("{}/callback/{}", state.config.issuer(), connector_id);

    if let Ok(callback) = connector.require_callback() {
        let url = callback.login_url(&callback_url, req_id)?;
        return Ok(FlowOutcome::Redirect(url));
    }
    if connector.capabilities.password.is_some() {
        return Ok(FlowOutcome::Redirect(format!("/auth/{connector_id}/login?req={req_id}")));
    }
    if let Ok(saml) = connector.require_saml() {
        return Ok(FlowOutcome::Html(saml.request_form_html(&callback_url, req_id)));
    }

    Err(Error::invalid_request("connector has no interactive login capability"))
}

#[get("/auth/<connector_id>?<req>")]
pub async fn auth_connector_get(state: &State<AppState>, connector_id: ConnectorId, req: String) -> Result<FlowOutcome, Error> {
    dispatch(state, connector_id.as_str(), &req).await
}

#[post("/auth/<connector_id>?<req>")]
pub async fn auth_connector_post(state: &State<AppState>, connector_id: ConnectorId, req: String) -> Result<FlowOutcome, Error> {
    dispatch(state, connector_id.as_str(), &req).await
}

#[get("/auth/<connector_id>/login?<req>")]
pub fn password_login_form(pages: &State<Pages>, connector_id: ConnectorId, req: String) -> FlowOutcome {
    FlowOutcome::Html(pages.password_login(connector_id.as_str(), &req, None))
}

#[derive(Debug, rocket::FromForm)]
pub struct PasswordLoginForm {
    pub req: String,
    pub username: String,
    pub password: String,
}

#[post("/auth/<connector_id>/login", data = "<form>")]
pub async fn password_login_submit(state: &State<AppState>, pages: &State<Pages>, connector_id: ConnectorId, form: Form<PasswordLoginForm>) -> Result<FlowOutcome, Error> {
    let form = form.into_inner();

    let connector = state.connectors.get(connector_id.as_str())?;
    let password_connector = connector.require_password()?;
    let identity = match password_connector.login(&form.username, &form.password).await {
        Ok(identity) => identity,
        Err(_) => return Ok(FlowOutcome::Html(pages.password_login(connector_id.as_str(), &form.req, Some("invalid username or password")))),
    };

    let req = login::finalize(state.storage.as_ref(), state.connectors.as_ref(), &form.req, identity).await?;

    if login::can_skip_approval(state.config, &req) {
        let response = crate::flow::approval::emit_code_response(state.storage.as_ref(), state.keys.as_ref(), state.config, &state.config.issuer(), req).await?;
        Ok(crate::http::support::code_response_outcome(pages.inner().as_ref(), response))
    } else {
        Ok(FlowOutcome::Redirect(login::approval_url(&state.config.issuer(), &req)))
    }
}
