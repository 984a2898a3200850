//
// `GET /userinfo` (spec.md §4.7, §6). Grounded on the teacher's bearer-token
// extraction in `src/auth.rs`'s `Headers` request guard.
//
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{get, Request, State};
use serde_json::json;

use crate::connector::Identity;
use crate::error::Error;
use crate::flow::AppState;
use crate::model::Claims;
use crate::proto::SubjectId;

pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) => Outcome::Success(BearerToken(token.to_string())),
            None => Outcome::Error((Status::Unauthorized, Error::access_denied("missing bearer token"))),
        }
    }
}

fn claims_json(sub: &str, claims: &Claims) -> serde_json::Value {
    json!({
        "sub": sub,
        "email": claims.email,
        "email_verified": claims.email_verified,
        "name": claims.username,
        "preferred_username": claims.preferred_username,
        "groups": claims.groups,
    })
}

#[get("/userinfo")]
pub async fn userinfo(state: &State<AppState>, auth: BearerToken) -> Result<Json<serde_json::Value>, Error> {
    let issuer = state.config.issuer();
    let active_keys = state.keys.current();
    let access_claims = crate::jwt::decode_access_token(&active_keys, &auth.0, &issuer)?;
    let subject = SubjectId::decode_b64url(&access_claims.sub)?;

    let prior = Identity {
        claims: Claims {
            user_id: subject.user_id.clone(),
            ..Default::default()
        },
        connector_data: serde_json::Value::Null,
    };

    let identity = state.connectors.refresh_identity(&subject.conn_id, &prior).await?;
    let claims = identity.map(|i| i.claims).unwrap_or(prior.claims);

    Ok(Json(claims_json(&access_claims.sub, &claims)))
}
