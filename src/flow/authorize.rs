//
// Authorization parser (spec.md §4.4, C4). Grounded on the teacher's
// `_check_is_some`-style up-front validation (`src/api/identity.rs`),
// generalized from a single form struct to the full `/auth` parameter set.
//
use chrono::Utc;

use crate::config::Config;
use crate::crypto;
use crate::error::Error;
use crate::model::{AuthRequest, Claims, Client, PkceMethod, PkceRequest, OOB_REDIRECT_URI};
use crate::storage::Storage;
use crate::util::get_uuid;

/// Raw, unvalidated `/auth` query parameters.
#[derive(Debug, Clone, Default, rocket::FromForm)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

const SUPPORTED_RESPONSE_TYPES: &[&str] = &["code", "token", "id_token"];

/// Validates `/auth` parameters into an unsaved `AuthRequest` (spec.md
/// §4.4). Errors that can be safely redirected to a *known-good*
/// `redirect_uri` come back as `Error::Redirect`; everything else — an
/// unknown client, an unregistered `redirect_uri` — comes back as
/// `Error::Display`, since redirecting there would hand an attacker a
/// believable phishing target.
pub async fn parse_and_validate(storage: &dyn Storage, config: &Config, params: AuthorizeParams) -> Result<AuthRequest, Error> {
    let client_id = params.client_id.clone().ok_or_else(|| Error::display(rocket::http::Status::BadRequest, "missing client_id"))?;

    let client = storage.get_client(&client_id).await.map_err(|_| Error::display(rocket::http::Status::BadRequest, "unknown client"))?;

    let redirect_uri = params.redirect_uri.clone().unwrap_or_else(|| {
        // Only safe to default when the client has exactly one registered
        // redirect URI; otherwise there is nothing trustworthy to fall back to.
        client.redirect_uris.first().cloned().unwrap_or_default()
    });

    if !client.accepts_redirect_uri(&redirect_uri) {
        return Err(Error::display(rocket::http::Status::BadRequest, "redirect_uri is not registered for this client"));
    }

    match validate_after_redirect_is_trustworthy(&client, &params) {
        Ok(response_types) => build_auth_request(config, &client, redirect_uri, params, response_types),
        Err(e) => Err(e),
    }
}

fn validate_after_redirect_is_trustworthy(client: &Client, params: &AuthorizeParams) -> Result<Vec<String>, Error> {
    let response_type = params.response_type.as_deref().unwrap_or("");
    let response_types: Vec<String> = response_type.split_whitespace().map(str::to_string).collect();

    if response_types.is_empty() || !response_types.iter().all(|rt| SUPPORTED_RESPONSE_TYPES.contains(&rt.as_str())) {
        return Err(protocol_redirect(params, "invalid_request", "unsupported response_type"));
    }

    let scopes: Vec<String> = params.scope.as_deref().unwrap_or("").split_whitespace().map(str::to_string).collect();
    if !scopes.iter().any(|s| s == "openid") {
        return Err(protocol_redirect(params, "invalid_scope", "scope must include openid"));
    }

    for scope in &scopes {
        if let Some(peer) = scope.strip_prefix("audience:server:client_id:") {
            if !client.trusted_peers.iter().any(|p| p == peer) {
                return Err(protocol_redirect(params, "invalid_scope", "requested audience is not a trusted peer"));
            }
        }
    }

    if let (Some(_), None) | (None, Some(_)) = (&params.code_challenge, &params.code_challenge_method) {
        return Err(protocol_redirect(params, "invalid_request", "code_challenge and code_challenge_method must be provided together"));
    }

    if let Some(method) = &params.code_challenge_method {
        if PkceMethod::parse(method).is_none() {
            return Err(protocol_redirect(params, "invalid_request", "unsupported code_challenge_method"));
        }
    }

    Ok(response_types)
}

fn build_auth_request(config: &Config, client: &Client, redirect_uri: String, params: AuthorizeParams, response_types: Vec<String>) -> Result<AuthRequest, Error> {
    let scopes: Vec<String> = params.scope.as_deref().unwrap_or("").split_whitespace().map(str::to_string).collect();

    let pkce = match (&params.code_challenge, &params.code_challenge_method) {
        (Some(challenge), Some(method)) => Some(PkceRequest {
            challenge: challenge.clone(),
            method: PkceMethod::parse(method).expect("validated above"),
        }),
        _ => None,
    };

    let _ = client;
    Ok(AuthRequest {
        id: get_uuid(),
        client_id: params.client_id.expect("validated above"),
        response_types,
        scopes,
        redirect_uri: redirect_uri.clone(),
        nonce: params.nonce,
        state: params.state,
        force_approval: false,
        logged_in: false,
        claims: Claims::default(),
        connector_id: None,
        connector_data: serde_json::Value::Null,
        hmac_key: crypto::get_random(vec![0u8; 32]),
        pkce,
        expiry: Utc::now() + config.auth_code_validity(),
    })
}

fn protocol_redirect(params: &AuthorizeParams, code: &str, description: &str) -> Error {
    let redirect_uri = params.redirect_uri.clone().unwrap_or_default();
    if redirect_uri.is_empty() || redirect_uri == OOB_REDIRECT_URI {
        return Error::display(rocket::http::Status::BadRequest, description.to_string());
    }
    let oauth_code = match code {
        "invalid_scope" => crate::error::OAuth2ErrorCode::InvalidScope,
        _ => crate::error::OAuth2ErrorCode::InvalidRequest,
    };
    Error::redirect(oauth_code, Some(description.to_string()), redirect_uri, params.state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    async fn client_fixture(storage: &MemoryStorage) {
        storage
            .create_client(Client {
                id: "c1".to_string(),
                secret: Some("s".to_string()),
                redirect_uris: vec!["https://c1/cb".to_string()],
                trusted_peers: vec!["c2".to_string()],
                public: false,
                logo_url: None,
                name: "Client One".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_missing_openid_scope_via_redirect() {
        let storage = MemoryStorage::new();
        client_fixture(&storage).await;
        let config = Config::load().unwrap();

        let params = AuthorizeParams {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://c1/cb".to_string()),
            scope: Some("email".to_string()),
            ..Default::default()
        };

        let err = parse_and_validate(&storage, &config, params).await.unwrap_err();
        assert!(matches!(err, Error::Redirect { .. }));
    }

    #[tokio::test]
    async fn accepts_trusted_peer_audience_scope() {
        let storage = MemoryStorage::new();
        client_fixture(&storage).await;
        let config = Config::load().unwrap();

        let params = AuthorizeParams {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://c1/cb".to_string()),
            scope: Some("openid audience:server:client_id:c2".to_string()),
            ..Default::default()
        };

        let req = parse_and_validate(&storage, &config, params).await.unwrap();
        assert!(req.scopes.iter().any(|s| s.contains("c2")));
    }

    #[tokio::test]
    async fn unknown_client_is_displayed_not_redirected() {
        let storage = MemoryStorage::new();
        let config = Config::load().unwrap();

        let params = AuthorizeParams {
            response_type: Some("code".to_string()),
            client_id: Some("nope".to_string()),
            ..Default::default()
        };

        let err = parse_and_validate(&storage, &config, params).await.unwrap_err();
        assert!(matches!(err, Error::Display { .. }));
    }
}
