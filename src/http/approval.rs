//
// `/approval` routes (spec.md §4.6, §6). Grounded on the teacher's
// `src/sso.rs` state-bound consent handling.
//
use std::sync::Arc;

use rocket::form::Form;
use rocket::{get, post, State};

use crate::error::Error;
use crate::flow::approval;
use crate::flow::AppState;
use crate::http::pages::PageRenderer;
use crate::http::support::{code_response_outcome, FlowOutcome};

type Pages = Arc<dyn PageRenderer>;

#[get("/approval?<req>&<hmac>")]
pub async fn approval_get(state: &State<AppState>, pages: &State<Pages>, req: String, hmac: String) -> Result<FlowOutcome, Error> {
    let auth_request = approval::validate_approval_mac(state.storage.as_ref(), &req, &hmac).await?;
    let client = state.storage.get_client(&auth_request.client_id).await?;
    Ok(FlowOutcome::Html(pages.consent(&req, &hmac, &client.name, &auth_request.scopes)))
}

#[derive(Debug, rocket::FromForm)]
pub struct ApprovalDecision {
    pub req: String,
    pub hmac: String,
    pub decision: String,
}

#[post("/approval", data = "<form>")]
pub async fn approval_post(state: &State<AppState>, pages: &State<Pages>, form: Form<ApprovalDecision>) -> Result<FlowOutcome, Error> {
    let form = form.into_inner();
    let auth_request = approval::validate_approval_mac(state.storage.as_ref(), &form.req, &form.hmac).await?;

    if form.decision != "approve" {
        state.storage.delete_auth_request(&auth_request.id).await?;
        return Err(Error::redirect(crate::error::OAuth2ErrorCode::AccessDenied, Some("the user denied the request".to_string()), auth_request.redirect_uri.clone(), auth_request.state.clone()));
    }

    let response = approval::emit_code_response(state.storage.as_ref(), state.keys.as_ref(), state.config, &state.config.issuer(), auth_request).await?;
    Ok(code_response_outcome(pages.inner().as_ref(), response))
}
