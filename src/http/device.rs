//
// `/device/code`, `/device`, `/device/callback` routes (spec.md §4.9).
// Grounded on the teacher's `src/api/identity.rs` authorize-dispatch shape,
// reused here to drive the browser leg of the device flow through the same
// `/auth` -> connector -> `/callback` pipeline, with the device code carried
// as the OAuth2 `state` parameter.
//
use std::sync::Arc;

use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::error::Error;
use crate::flow::authorize::{self, AuthorizeParams};
use crate::flow::{device, token, AppState};
use crate::http::pages::PageRenderer;
use crate::http::support::FlowOutcome;

type Pages = Arc<dyn PageRenderer>;

fn device_callback_url(issuer: &str) -> String {
    format!("{issuer}/device/callback")
}

#[post("/device/code", data = "<form>")]
pub async fn device_code(state: &State<AppState>, form: Form<device::DeviceCodeParams>) -> Result<Json<device::DeviceCodeResponse>, Error> {
    let issuer = state.config.issuer();
    let response = device::start(state.storage.as_ref(), state.config, &issuer, form.into_inner()).await?;
    Ok(Json(response))
}

#[get("/device?<user_code>")]
pub fn device_verify_form(pages: &State<Pages>, user_code: Option<String>) -> FlowOutcome {
    FlowOutcome::Html(pages.device_user_code_form(user_code.as_deref(), None))
}

#[derive(Debug, rocket::FromForm)]
pub struct UserCodeForm {
    pub user_code: String,
}

/// The browser leg of the device flow: the user types in their `user_code`,
/// which is resolved back to the pending `DeviceRequest`, and the request is
/// handed off to the ordinary `/auth` -> connector -> `/callback` pipeline
/// with the device code riding along as the `state` parameter so
/// `/device/callback` can find its way back to the waiting poller.
#[post("/device", data = "<form>")]
pub async fn device_verify_submit(state: &State<AppState>, pages: &State<Pages>, form: Form<UserCodeForm>) -> Result<FlowOutcome, Error> {
    let form = form.into_inner();
    let request = match device::lookup_by_user_code(state.storage.as_ref(), &form.user_code).await {
        Ok(r) => r,
        Err(_) => return Ok(FlowOutcome::Html(pages.device_user_code_form(None, Some("unknown or expired code")))),
    };

    let issuer = state.config.issuer();
    let params = AuthorizeParams {
        response_type: Some("code".to_string()),
        client_id: Some(request.client_id.clone()),
        redirect_uri: Some(device_callback_url(&issuer)),
        scope: Some(request.scopes.join(" ")),
        state: Some(request.device_code.clone()),
        nonce: None,
        code_challenge: None,
        code_challenge_method: None,
    };

    let auth_request = authorize::parse_and_validate(state.storage.as_ref(), state.config, params).await?;
    let req_id = auth_request.id.clone();
    state.storage.create_auth_request(auth_request).await?;

    let connectors = state.storage.list_connectors().await?;
    Ok(FlowOutcome::Html(pages.connector_chooser(&req_id, &connectors)))
}

/// Bridges a completed internal auth-code exchange into the waiting
/// `DeviceToken` (spec.md §4.9). The `state` parameter carries the
/// `device_code` set up by `device_verify_submit`.
#[get("/device/callback?<code>&<state_param>&<error>")]
pub async fn device_callback(state: &State<AppState>, pages: &State<Pages>, code: Option<String>, state_param: Option<String>, error: Option<String>) -> Result<FlowOutcome, Error> {
    let device_code = state_param.ok_or_else(|| Error::invalid_request("missing state"))?;
    if let Some(error) = error {
        device::complete(state.storage.as_ref(), &device_code, &serde_json::json!({"error": error})).await.ok();
        return Ok(FlowOutcome::Html(pages.plain_message("Login failed. You may close this window.")));
    }
    let code = code.ok_or_else(|| Error::invalid_request("missing code"))?;

    let auth_code = state.storage.get_auth_code(&code).await?;
    let client = state.storage.get_client(&auth_code.client_id).await?;
    let issuer = state.config.issuer();

    let params = token::TokenParams {
        grant_type: Some(token::GRANT_AUTHORIZATION_CODE.to_string()),
        code: Some(code),
        redirect_uri: Some(device_callback_url(&issuer)),
        client_id: Some(client.id.clone()),
        ..Default::default()
    };

    let response = token::handle_authorization_code(state.storage.as_ref(), state.keys.as_ref(), state.config, &issuer, &client, &params).await?;
    let payload = token::json_response(&response);
    device::complete(state.storage.as_ref(), &device_code, &payload).await?;

    Ok(FlowOutcome::Html(pages.plain_message("Device activated. You may close this window.")))
}
