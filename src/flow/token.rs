//
// Token endpoint (spec.md §4.7, C7). Grounded on the teacher's
// `login`/`ConnectData` grant-type dispatch (`src/api/identity.rs`) and
// `src/sso.rs`'s token response shaping, reworked for PKCE and the full
// grant set this spec requires.
//
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::connector::{ConnectorRegistry, Identity};
use crate::error::Error;
use crate::flow::refresh;
use crate::keys::KeyCache;
use crate::model::{Claims, Client, PkceMethod, PkceRequest};
use crate::storage::Storage;
use crate::util::b64url_encode;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
pub const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

const PASSWORD_GRANT_ALLOWED_SCOPES: &[&str] = &["openid", "email", "profile", "groups", "offline_access"];

/// `POST /token` form fields (spec.md §4.7). Optional fields vary by grant.
#[derive(Debug, Clone, Default, rocket::FromForm)]
pub struct TokenParams {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub device_code: Option<String>,
    pub subject_token: Option<String>,
    pub subject_token_type: Option<String>,
    pub connector_id: Option<String>,
    pub requested_token_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Client authentication: HTTP Basic (already url-decoded by the caller)
/// or `client_id`/`client_secret` form fields, compared in constant time
/// (spec.md §4.7). Public clients may omit the secret.
pub async fn authenticate_client(storage: &dyn Storage, basic_auth: Option<(String, String)>, params: &TokenParams) -> Result<Client, Error> {
    let (client_id, client_secret) = match basic_auth {
        Some((id, secret)) => (id, Some(secret)),
        None => (params.client_id.clone().ok_or_else(|| Error::invalid_client("missing client_id"))?, params.client_secret.clone()),
    };

    let client = storage.get_client(&client_id).await.map_err(|_| Error::invalid_client("unknown client"))?;

    match (&client.secret, client_secret) {
        (Some(stored), Some(provided)) if crate::crypto::ct_eq(stored.as_bytes(), provided.as_bytes()) => Ok(client),
        (Some(_), _) if client.public => Ok(client),
        (Some(_), _) => Err(Error::invalid_client("client authentication failed")),
        (None, _) if client.public => Ok(client),
        (None, _) => Err(Error::invalid_client("client record has no secret and is not public")),
    }
}

/// PKCE verification (spec.md §4.7 "PKCE rules"): both present must match;
/// exactly one present is always an error; both absent is allowed only for
/// clients not required to use PKCE.
pub fn verify_pkce(stored: Option<&PkceRequest>, verifier: Option<&str>, pkce_required: bool) -> Result<(), Error> {
    match (stored, verifier) {
        (Some(challenge), Some(verifier)) => {
            let computed = compute_challenge(verifier, challenge.method);
            if crate::crypto::ct_eq(computed.as_bytes(), challenge.challenge.as_bytes()) {
                Ok(())
            } else {
                Err(Error::invalid_grant("PKCE verifier does not match challenge"))
            }
        }
        (None, Some(_)) => Err(Error::invalid_request("code_verifier supplied without a stored challenge")),
        (Some(_), None) => Err(Error::invalid_grant("missing code_verifier for a PKCE-protected code")),
        (None, None) if pkce_required => Err(Error::invalid_grant("PKCE is required for this client")),
        (None, None) => Ok(()),
    }
}

fn compute_challenge(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::Plain => verifier.to_string(),
        PkceMethod::S256 => {
            use sha2::{Digest, Sha256};
            b64url_encode(&Sha256::digest(verifier.as_bytes()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn issue_tokens(keys: &KeyCache, issuer: &str, client: &Client, connector_id: &str, claims: &Claims, scopes: &[String], nonce: Option<String>, auth_code: Option<&str>, config: &Config, want_id_token: bool) -> Result<(String, Option<String>), Error> {
    let active = keys.current();
    let now = Utc::now();

    let access_token = crate::jwt::mint_access_token(&active, issuer, &claims.user_id, connector_id, &client.id, scopes, now, config.access_token_validity())?;
    let peers = client.cross_client_peers(scopes);

    let id_token = if want_id_token {
        Some(crate::jwt::mint_id_token(&active, issuer, &claims.user_id, connector_id, &client.id, &peers, claims, nonce, Some(&access_token), auth_code, now, config.id_token_validity())?.jwt)
    } else {
        None
    };

    Ok((access_token, id_token))
}

pub async fn handle_authorization_code(storage: &dyn Storage, keys: &KeyCache, config: &Config, issuer: &str, client: &Client, params: &TokenParams) -> Result<TokenResponse, Error> {
    let code_id = params.code.clone().ok_or_else(|| Error::invalid_request("missing code"))?;
    let code = storage.get_auth_code(&code_id).await.map_err(|_| Error::invalid_grant("unknown or already-used code"))?;

    if code.client_id != client.id {
        return Err(Error::invalid_grant("code was not issued to this client"));
    }
    if code.is_expired(Utc::now()) {
        storage.delete_auth_code(&code_id).await?;
        return Err(Error::invalid_grant("code has expired"));
    }
    if params.redirect_uri.as_deref() != Some(code.redirect_uri.as_str()) {
        return Err(Error::invalid_grant("redirect_uri does not match the one used at authorization time"));
    }

    verify_pkce(code.pkce.as_ref(), params.code_verifier.as_deref(), config.pkce_required_for_public_clients() && client.public)?;

    // Single-use: delete immediately so a concurrent second exchange
    // observes `NotFound` rather than racing on the same code's claims
    // (spec.md §8 invariant 1).
    storage.delete_auth_code(&code_id).await?;

    let wants_offline = code.scopes.iter().any(|s| s == "offline_access");
    let refresh_wire = if wants_offline {
        let (wire, _) = refresh::create(storage, &client.id, &code.connector_id, code.scopes.clone(), code.claims.clone(), code.connector_data.clone()).await?;
        Some(wire)
    } else {
        None
    };

    let (access_token, id_token) = issue_tokens(keys, issuer, client, &code.connector_id, &code.claims, &code.scopes, code.nonce.clone(), Some(&code.id), config, true).await?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: config.access_token_validity().num_seconds(),
        refresh_token: refresh_wire,
        id_token,
        scope: Some(code.scopes.join(" ")),
    })
}

pub async fn handle_refresh_token(storage: &dyn Storage, connectors: &ConnectorRegistry, keys: &KeyCache, config: &Config, issuer: &str, client: &Client, params: &TokenParams) -> Result<TokenResponse, Error> {
    let wire_token = params.refresh_token.clone().ok_or_else(|| Error::invalid_request("missing refresh_token"))?;
    let requested_scopes: Option<Vec<String>> = params.scope.as_ref().map(|s| s.split_whitespace().map(str::to_string).collect());

    let rotated = refresh::exchange(storage, connectors, config, &client.id, &wire_token, requested_scopes.as_deref()).await?;

    let (access_token, id_token) = issue_tokens(keys, issuer, client, &rotated.record.connector_id, &rotated.record.claims, &rotated.record.scopes, rotated.record.nonce.clone(), None, config, true).await?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: config.access_token_validity().num_seconds(),
        refresh_token: Some(rotated.wire_token),
        id_token,
        scope: Some(rotated.record.scopes.join(" ")),
    })
}

pub async fn handle_password(storage: &dyn Storage, connectors: &ConnectorRegistry, keys: &KeyCache, config: &Config, issuer: &str, client: &Client, connector_id: &str, params: &TokenParams) -> Result<TokenResponse, Error> {
    let scopes: Vec<String> = params.scope.as_deref().unwrap_or("openid").split_whitespace().map(str::to_string).collect();
    if !scopes.iter().any(|s| s == "openid") {
        return Err(Error::invalid_scope("password grant requires the openid scope"));
    }
    for scope in &scopes {
        let is_allowed = PASSWORD_GRANT_ALLOWED_SCOPES.contains(&scope.as_str()) || scope.starts_with("federated:id") || scope.starts_with("audience:server:client_id:");
        if !is_allowed {
            return Err(Error::invalid_scope(format!("scope not permitted on the password grant: {scope}")));
        }
    }

    let username = params.username.clone().ok_or_else(|| Error::invalid_request("missing username"))?;
    let password = params.password.clone().ok_or_else(|| Error::invalid_request("missing password"))?;

    let connector = connectors.get(connector_id)?;
    let password_connector = connector.require_password()?;
    let identity = password_connector.login(&username, &password).await.map_err(|_| Error::access_denied("invalid credentials"))?;

    let wants_offline = scopes.iter().any(|s| s == "offline_access");
    let refresh_wire = if wants_offline {
        let (wire, _) = refresh::create(storage, &client.id, connector_id, scopes.clone(), identity.claims.clone(), identity.connector_data.clone()).await?;
        Some(wire)
    } else {
        None
    };

    let (access_token, id_token) = issue_tokens(keys, issuer, client, connector_id, &identity.claims, &scopes, None, None, config, true).await?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: config.access_token_validity().num_seconds(),
        refresh_token: refresh_wire,
        id_token,
        scope: Some(scopes.join(" ")),
    })
}

pub async fn handle_token_exchange(connectors: &ConnectorRegistry, keys: &KeyCache, config: &Config, issuer: &str, client: &Client, params: &TokenParams) -> Result<TokenResponse, Error> {
    let subject_token = params.subject_token.clone().ok_or_else(|| Error::invalid_request("missing subject_token"))?;
    let subject_token_type = params.subject_token_type.clone().ok_or_else(|| Error::invalid_request("missing subject_token_type"))?;
    if !["access_token", "id_token"].contains(&subject_token_type.as_str()) {
        return Err(Error::invalid_request("unsupported subject_token_type"));
    }
    let connector_id = params.connector_id.clone().ok_or_else(|| Error::invalid_request("missing connector_id"))?;

    let connector = connectors.get(&connector_id)?;
    let verifier = connector.require_token_identity()?;
    let identity = verifier.verify_subject_token(&subject_token, &subject_token_type).await?;

    let requested_token_type = params.requested_token_type.as_deref().unwrap_or("access_token");
    let scopes = vec!["openid".to_string()];

    let (access_token, id_token) = issue_tokens(keys, issuer, client, &connector_id, &identity.claims, &scopes, None, None, config, requested_token_type == "id_token").await?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: config.access_token_validity().num_seconds(),
        refresh_token: None,
        id_token,
        scope: Some(scopes.join(" ")),
    })
}

/// Helper for connectors that don't actually refresh anything, used by
/// tests and as the default for connectors with no `Refresh` capability.
pub fn identity_unchanged(prior: &Identity) -> Identity {
    prior.clone()
}

pub fn json_response(resp: &TokenResponse) -> serde_json::Value {
    json!(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_both_absent_allowed_when_not_required() {
        assert!(verify_pkce(None, None, false).is_ok());
    }

    #[test]
    fn pkce_both_absent_rejected_when_required() {
        assert!(verify_pkce(None, None, true).is_err());
    }

    #[test]
    fn pkce_verifier_without_challenge_is_invalid_request() {
        let err = verify_pkce(None, Some("verifier"), false).unwrap_err();
        assert!(matches!(err, Error::Protocol { code: crate::error::OAuth2ErrorCode::InvalidRequest, .. }));
    }

    #[test]
    fn pkce_s256_match_succeeds() {
        let verifier = "a-random-verifier-value";
        let challenge = compute_challenge(verifier, PkceMethod::S256);
        let stored = PkceRequest { challenge, method: PkceMethod::S256 };
        assert!(verify_pkce(Some(&stored), Some(verifier), false).is_ok());
    }

    #[test]
    fn pkce_mismatch_is_invalid_grant() {
        let stored = PkceRequest {
            challenge: compute_challenge("right", PkceMethod::S256),
            method: PkceMethod::S256,
        };
        let err = verify_pkce(Some(&stored), Some("wrong"), false).unwrap_err();
        assert!(matches!(err, Error::Protocol { code: crate::error::OAuth2ErrorCode::InvalidGrant, .. }));
    }
}
