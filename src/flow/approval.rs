//
// Approval + code issuer (spec.md §4.6, C6). Grounded on the teacher's
// HMAC-bound state handling (`src/sso.rs`'s `encode_code_claims`/
// `deocde_state`), generalized to a constant-time HMAC-equality check
// against a freshly recomputed MAC rather than a JWT-wrapped blob.
//
use chrono::Utc;

use crate::crypto;
use crate::error::Error;
use crate::model::{AuthCode, AuthRequest};
use crate::storage::Storage;
use crate::util::{b64url_decode, get_uuid};

/// Validates the caller-supplied MAC against a freshly recomputed
/// `HMAC-SHA256(authReq.hmac_key, authReq.id)` (spec.md §4.6, §8 invariant
/// 7). Returns 401 (via `Error::Display`) on any mismatch, including an
/// unparsable MAC.
pub async fn validate_approval_mac(storage: &dyn Storage, req_id: &str, supplied_mac_b64url: &str) -> Result<AuthRequest, Error> {
    let req = storage.get_auth_request(req_id).await.map_err(|_| unauthorized())?;
    if req.is_expired(Utc::now()) {
        return Err(Error::display(rocket::http::Status::Gone, "session expired"));
    }

    let supplied_mac = b64url_decode(supplied_mac_b64url).map_err(|_| unauthorized())?;
    if !crypto::hmac_sha256_verify(&req.hmac_key, req.id.as_bytes(), &supplied_mac) {
        return Err(unauthorized());
    }

    Ok(req)
}

fn unauthorized() -> Error {
    Error::display(rocket::http::Status::Unauthorized, "invalid approval request")
}

/// What the `/approval` or implicit/hybrid response renders back to the
/// client (spec.md §4.6 "Code emission").
pub enum CodeResponse {
    /// `response_type=code`: either a redirect carrying `code`/`state`, or
    /// - for the OOB redirect URI - the code rendered to the user.
    Redirect { location: String },
    Oob { code: String },
    /// `token`/`id_token` (implicit/hybrid): minted tokens returned in the
    /// URI fragment (OIDC §3.3.2.5).
    Fragment { location: String },
}

/// Builds the redirect (or OOB render) for whichever `response_type`
/// combination the request asked for, including the hybrid combinations
/// (`code token`, `code id_token`, `code token id_token`, OIDC §3.3) where a
/// code goes in the query string and minted tokens go in the fragment of
/// the *same* redirect.
#[allow(clippy::too_many_arguments)]
pub async fn emit_code_response(storage: &dyn Storage, keys: &crate::keys::KeyCache, config: &crate::config::Config, issuer: &str, req: AuthRequest) -> Result<CodeResponse, Error> {
    storage.delete_auth_request(&req.id).await?;

    let wants_code = req.response_types.iter().any(|rt| rt == "code");
    let wants_token = req.response_types.iter().any(|rt| rt == "token");
    let wants_id_token = req.response_types.iter().any(|rt| rt == "id_token");

    if !wants_code && !wants_token && !wants_id_token {
        return Err(Error::invalid_request("no response_type produced a response"));
    }

    let connector_id = req.connector_id.clone().unwrap_or_default();

    let code_id = if wants_code {
        let code = AuthCode {
            id: get_uuid(),
            client_id: req.client_id.clone(),
            connector_id: connector_id.clone(),
            nonce: req.nonce.clone(),
            scopes: req.scopes.clone(),
            claims: req.claims.clone(),
            redirect_uri: req.redirect_uri.clone(),
            connector_data: req.connector_data.clone(),
            pkce: req.pkce.clone(),
            expiry: Utc::now() + config.auth_code_validity(),
        };
        storage.create_auth_code(code.clone()).await?;

        if req.redirect_uri == crate::model::OOB_REDIRECT_URI {
            return Ok(CodeResponse::Oob { code: code.id });
        }
        Some(code.id)
    } else {
        None
    };

    let mut location = url::Url::parse(&req.redirect_uri).map_err(|_| Error::invalid_request("bad redirect_uri"))?;

    if let Some(code_id) = &code_id {
        let mut query = location.query_pairs_mut();
        query.append_pair("code", code_id);
        if let Some(state) = &req.state {
            query.append_pair("state", state);
        }
    }

    if wants_token || wants_id_token {
        let client = storage.get_client(&req.client_id).await.map_err(|_| Error::invalid_request("unknown client"))?;
        let peers = client.cross_client_peers(&req.scopes);
        let active = keys.current();
        let now = Utc::now();

        let access_token = if wants_token {
            Some(crate::jwt::mint_access_token(&active, issuer, &req.claims.user_id, &connector_id, &req.client_id, &req.scopes, now, config.access_token_validity())?)
        } else {
            None
        };

        let id_token = if wants_id_token {
            Some(
                crate::jwt::mint_id_token(
                    &active,
                    issuer,
                    &req.claims.user_id,
                    &connector_id,
                    &req.client_id,
                    &peers,
                    &req.claims,
                    req.nonce.clone(),
                    access_token.as_deref(),
                    code_id.as_deref(),
                    now,
                    config.id_token_validity(),
                )?
                .jwt,
            )
        } else {
            None
        };

        let mut fragment = String::new();
        if let Some(token) = &access_token {
            fragment.push_str(&format!("access_token={token}&token_type=bearer"));
            // expires_in is omitted when a code also carries the grant (spec.md §4.6).
            if code_id.is_none() {
                fragment.push_str(&format!("&expires_in={}", config.access_token_validity().num_seconds()));
            }
        }
        if let Some(token) = &id_token {
            if !fragment.is_empty() {
                fragment.push('&');
            }
            fragment.push_str(&format!("id_token={token}"));
        }
        if code_id.is_none() {
            if let Some(state) = &req.state {
                if !fragment.is_empty() {
                    fragment.push('&');
                }
                fragment.push_str(&format!("state={state}"));
            }
        }
        location.set_fragment(Some(&fragment));
    }

    Ok(CodeResponse::Redirect { location: location.to_string() })
}
