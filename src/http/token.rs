//
// `POST /token` (spec.md §4.7, §6) and its deprecated `/device/token` alias
// (spec.md §4.9). Grounded on the teacher's `login` grant-type dispatch in
// `src/api/identity.rs`.
//
use rocket::form::Form;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::{post, Request, State};

use crate::error::Error;
use crate::flow::token::{self, TokenParams};
use crate::flow::{device, AppState};

pub struct BasicAuth(pub String, pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BasicAuth {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(header) = request.headers().get_one("Authorization") else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Ok(decoded) = data_encoding::BASE64.decode(encoded.trim().as_bytes()) else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return Outcome::Forward(Status::Unauthorized);
        };
        match text.split_once(':') {
            Some((id, secret)) => Outcome::Success(BasicAuth(id.to_string(), secret.to_string())),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

async fn handle(state: &State<AppState>, basic: Option<BasicAuth>, params: TokenParams) -> Result<serde_json::Value, Error> {
    let basic_pair = basic.map(|BasicAuth(id, secret)| (id, secret));
    let client = token::authenticate_client(state.storage.as_ref(), basic_pair, &params).await?;

    let issuer = state.config.issuer();
    let grant_type = params.grant_type.as_deref().unwrap_or("");

    let response = match grant_type {
        token::GRANT_AUTHORIZATION_CODE => token::handle_authorization_code(state.storage.as_ref(), state.keys.as_ref(), state.config, &issuer, &client, &params).await?,
        token::GRANT_REFRESH_TOKEN => token::handle_refresh_token(state.storage.as_ref(), state.connectors.as_ref(), state.keys.as_ref(), state.config, &issuer, &client, &params).await?,
        token::GRANT_PASSWORD => {
            let connector_id = params.connector_id.clone().ok_or_else(|| Error::invalid_request("missing connector_id"))?;
            token::handle_password(state.storage.as_ref(), state.connectors.as_ref(), state.keys.as_ref(), state.config, &issuer, &client, &connector_id, &params).await?
        }
        token::GRANT_DEVICE_CODE => {
            let device_code = params.device_code.clone().ok_or_else(|| Error::invalid_request("missing device_code"))?;
            return device::poll(state.storage.as_ref(), state.config, &device_code, params.code_verifier.as_deref()).await;
        }
        token::GRANT_TOKEN_EXCHANGE => token::handle_token_exchange(state.connectors.as_ref(), state.keys.as_ref(), state.config, &issuer, &client, &params).await?,
        other => return Err(Error::unsupported_grant_type(format!("unsupported grant_type: {other}"))),
    };

    Ok(token::json_response(&response))
}

#[post("/token", data = "<form>")]
pub async fn token(state: &State<AppState>, basic: Option<BasicAuth>, form: Form<TokenParams>) -> Result<crate::http::support::NoStoreJson, Error> {
    let body = handle(state, basic, form.into_inner()).await?;
    Ok(crate::http::support::NoStoreJson(body))
}

/// Deprecated alias accepting only the device-code grant (spec.md §4.9's
/// `/device/token`; the resolution for this deprecated-alias scope is
/// recorded alongside the other Open Question decisions in DESIGN.md).
#[post("/device/token", data = "<form>")]
pub async fn device_token(state: &State<AppState>, basic: Option<BasicAuth>, form: Form<TokenParams>) -> Result<crate::http::support::NoStoreJson, Error> {
    let params = form.into_inner();
    if params.grant_type.as_deref() != Some(token::GRANT_DEVICE_CODE) {
        return Err(Error::unsupported_grant_type("/device/token only accepts the device-code grant"));
    }

    let basic_pair = basic.map(|BasicAuth(id, secret)| (id, secret));
    token::authenticate_client(state.storage.as_ref(), basic_pair, &params).await?;

    let device_code = params.device_code.clone().ok_or_else(|| Error::invalid_request("missing device_code"))?;
    let body = device::poll(state.storage.as_ref(), state.config, &device_code, params.code_verifier.as_deref()).await?;
    Ok(crate::http::support::NoStoreJson(body))
}
