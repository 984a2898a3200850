//
// Discovery + JWKS (spec.md §6). Grounded on the teacher's static
// `web_routes`/JSON-`Value`-returning handlers (`src/api/web.rs`), adapted
// to OIDC's fixed discovery document shape.
//
use rocket::http::ContentType;
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{get, Request, Response, State};
use serde_json::json;

use crate::error::Error;
use crate::flow::AppState;

#[get("/.well-known/openid-configuration")]
pub fn openid_configuration(state: &State<AppState>) -> Json<serde_json::Value> {
    let issuer = state.config.issuer();
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/auth"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/keys"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "device_authorization_endpoint": format!("{issuer}/device/code"),
        "grant_types_supported": [
            "authorization_code",
            "refresh_token",
            "password",
            "urn:ietf:params:oauth:grant-type:device_code",
            "urn:ietf:params:oauth:grant-type:token-exchange",
        ],
        "response_types_supported": ["code", "token", "id_token", "token id_token", "code id_token", "code token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "scopes_supported": ["openid", "email", "profile", "groups", "offline_access"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "claims_supported": ["sub", "iss", "aud", "exp", "iat", "email", "email_verified", "name", "preferred_username", "groups"],
    }))
}

pub struct JwksResponse {
    body: serde_json::Value,
    max_age_seconds: i64,
}

impl<'r> Responder<'r, 'static> for JwksResponse {
    fn respond_to(self, _request: &'r Request<'_>) -> rocket::response::Result<'static> {
        let body = serde_json::to_string(&self.body).unwrap_or_else(|_| "{\"keys\":[]}".to_string());
        Response::build()
            .header(ContentType::JSON)
            .raw_header("Cache-Control", format!("max-age={}, must-revalidate", self.max_age_seconds))
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

#[get("/keys")]
pub fn jwks(state: &State<AppState>) -> Result<JwksResponse, Error> {
    let active = state.keys.current();
    Ok(JwksResponse {
        body: active.jwks_json()?,
        max_age_seconds: active.max_age_seconds(),
    })
}
