//
// `/callback`, `/callback/{connector}` routes (spec.md §4.5, §6): GET for
// OAuth2-style redirect callbacks, POST for SAML's POST binding. Grounded
// on the teacher's `src/sso.rs` `exchange_code` callback handler shape.
//
use std::collections::HashMap;
use std::sync::Arc;

use rocket::form::Form;
use rocket::{get, post, State};

use crate::error::Error;
use crate::flow::login;
use crate::flow::AppState;
use crate::http::pages::PageRenderer;
use crate::http::support::{code_response_outcome, ConnectorId, FlowOutcome};
use crate::model::AuthRequest;

type Pages = Arc<dyn PageRenderer>;

async fn after_login(state: &State<AppState>, pages: &State<Pages>, req_id: &str, identity: crate::connector::Identity) -> Result<FlowOutcome, Error> {
    let req = login::finalize(state.storage.as_ref(), state.connectors.as_ref(), req_id, identity).await?;

    if login::can_skip_approval(state.config, &req) {
        let response = crate::flow::approval::emit_code_response(state.storage.as_ref(), state.keys.as_ref(), state.config, &state.config.issuer(), req).await?;
        Ok(code_response_outcome(pages.inner().as_ref(), response))
    } else {
        Ok(FlowOutcome::Redirect(login::approval_url(&state.config.issuer(), &req)))
    }
}

async fn resolve_connector_id(state: &State<AppState>, req_id: &str) -> Result<(AuthRequest, String), Error> {
    let req = state.storage.get_auth_request(req_id).await.map_err(|_| Error::display(rocket::http::Status::Gone, "unknown or expired request"))?;
    let connector_id = req.connector_id.clone().ok_or_else(|| Error::invalid_request("no connector chosen for this request"))?;
    Ok((req, connector_id))
}

#[get("/callback/<connector_id>?<code>&<state_param>&<error>")]
pub async fn callback_connector_get(
    state: &State<AppState>,
    pages: &State<Pages>,
    connector_id: ConnectorId,
    code: Option<String>,
    state_param: Option<String>,
    error: Option<String>,
) -> Result<FlowOutcome, Error> {
    let req_id = state_param.ok_or_else(|| Error::invalid_request("missing state"))?;
    if let Some(error) = error {
        return Err(Error::display(rocket::http::Status::BadRequest, format!("upstream login failed: {error}")));
    }

    let mut query = HashMap::new();
    if let Some(code) = code {
        query.insert("code".to_string(), code);
    }

    let connector = state.connectors.get(connector_id.as_str())?;
    let identity = connector.require_callback()?.handle_callback(&query).await?;

    after_login(state, pages, &req_id, identity).await
}

#[get("/callback?<code>&<state_param>&<error>")]
pub async fn callback_get(state: &State<AppState>, pages: &State<Pages>, code: Option<String>, state_param: Option<String>, error: Option<String>) -> Result<FlowOutcome, Error> {
    let req_id = state_param.ok_or_else(|| Error::invalid_request("missing state"))?;
    if let Some(error) = error {
        return Err(Error::display(rocket::http::Status::BadRequest, format!("upstream login failed: {error}")));
    }
    let (_, connector_id) = resolve_connector_id(state, &req_id).await?;

    let mut query = HashMap::new();
    if let Some(code) = code {
        query.insert("code".to_string(), code);
    }

    let connector = state.connectors.get(&connector_id)?;
    let identity = connector.require_callback()?.handle_callback(&query).await?;

    after_login(state, pages, &req_id, identity).await
}

#[derive(Debug, rocket::FromForm)]
pub struct SamlAssertionForm {
    #[field(name = "SAMLResponse")]
    pub saml_response: String,
    #[field(name = "RelayState")]
    pub relay_state: String,
}

#[post("/callback/<connector_id>", data = "<form>")]
pub async fn callback_connector_post(state: &State<AppState>, pages: &State<Pages>, connector_id: ConnectorId, form: Form<SamlAssertionForm>) -> Result<FlowOutcome, Error> {
    let form = form.into_inner();
    let connector = state.connectors.get(connector_id.as_str())?;
    let identity = connector.require_saml()?.handle_assertion(&form.saml_response).await?;
    after_login(state, pages, &form.relay_state, identity).await
}

#[post("/callback", data = "<form>")]
pub async fn callback_post(state: &State<AppState>, pages: &State<Pages>, form: Form<SamlAssertionForm>) -> Result<FlowOutcome, Error> {
    let form = form.into_inner();
    let (_, connector_id) = resolve_connector_id(state, &form.relay_state).await?;
    let connector = state.connectors.get(&connector_id)?;
    let identity = connector.require_saml()?.handle_assertion(&form.saml_response).await?;
    after_login(state, pages, &form.relay_state, identity).await
}
