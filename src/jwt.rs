//
// ID/access token minting and verification (spec.md §4.7 "Token shape").
// Grounded on the teacher's `encode_jwt`/`decode_jwt` pair (`src/auth.rs`)
// and `src/sso.rs`'s `encode_ssotoken_claims`, reworked to source signing
// material from the rotating key cache (C2) instead of static PEM files.
//
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::keys::ActiveKeys;
use crate::model::Claims;
use crate::proto::SubjectId;

pub const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

/// ID token claims (spec.md §4.7): standard claims plus the scoped claims
/// carried over from the connector identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    /// Singular when there's one audience, a list under cross-client
    /// scopes (spec.md §4.7 "aud becomes a list").
    pub aud: AudienceClaim,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federated_claims: Option<FederatedClaims>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedClaims {
    pub connector_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudienceClaim {
    One(String),
    Many(Vec<String>),
}

impl AudienceClaim {
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Self::One(a) => a == aud,
            Self::Many(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Plain access-token claims. Access tokens in this Provider are also
/// RSA-signed JWTs (not necessarily opaque), so `/userinfo` can verify one
/// the same way it verifies an ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: AudienceClaim,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

pub struct MintedIdToken {
    pub jwt: String,
    pub claims: IdTokenClaims,
}

#[allow(clippy::too_many_arguments)]
pub fn mint_id_token(
    active_keys: &ActiveKeys,
    issuer: &str,
    user_id: &str,
    connector_id: &str,
    client_id: &str,
    trusted_peers: &[String],
    claims: &Claims,
    nonce: Option<String>,
    access_token: Option<&str>,
    auth_code: Option<&str>,
    now: DateTime<Utc>,
    validity: chrono::Duration,
) -> Result<MintedIdToken, Error> {
    let sub = SubjectId {
        conn_id: connector_id.to_string(),
        user_id: user_id.to_string(),
    }
    .encode_b64url();

    let aud = if trusted_peers.is_empty() {
        AudienceClaim::One(client_id.to_string())
    } else {
        let mut peers = vec![client_id.to_string()];
        peers.extend(trusted_peers.iter().cloned());
        AudienceClaim::Many(peers)
    };

    let body = IdTokenClaims {
        iss: issuer.to_string(),
        sub,
        aud,
        iat: now.timestamp(),
        exp: (now + validity).timestamp(),
        nonce,
        at_hash: access_token.map(left_most_half_hash),
        c_hash: auth_code.map(left_most_half_hash),
        azp: if trusted_peers.is_empty() { None } else { Some(client_id.to_string()) },
        email: claims.email.clone(),
        email_verified: claims.email.as_ref().map(|_| claims.email_verified),
        name: claims.username.clone(),
        preferred_username: claims.preferred_username.clone(),
        groups: claims.groups.clone(),
        federated_claims: Some(FederatedClaims {
            connector_id: connector_id.to_string(),
            user_id: user_id.to_string(),
        }),
    };

    encode(active_keys, &body).map(|jwt| MintedIdToken { jwt, claims: body })
}

pub fn mint_access_token(active_keys: &ActiveKeys, issuer: &str, user_id: &str, connector_id: &str, client_id: &str, scopes: &[String], now: DateTime<Utc>, validity: chrono::Duration) -> Result<String, Error> {
    let sub = SubjectId {
        conn_id: connector_id.to_string(),
        user_id: user_id.to_string(),
    }
    .encode_b64url();

    let body = AccessTokenClaims {
        iss: issuer.to_string(),
        sub,
        aud: AudienceClaim::One(client_id.to_string()),
        iat: now.timestamp(),
        exp: (now + validity).timestamp(),
        scope: scopes.join(" "),
    };

    encode(active_keys, &body)
}

fn encode<T: Serialize>(active_keys: &ActiveKeys, claims: &T) -> Result<String, Error> {
    let mut header = Header::new(JWT_ALGORITHM);
    header.kid = Some(active_keys.keys.signing_kid.clone());
    jsonwebtoken::encode(&header, claims, &active_keys.encoding_key).map_err(|e| Error::internal(format!("jwt encode failed: {e}")))
}

/// Verifies a token against whichever retained key matches its `kid`
/// (spec.md §8 invariant 5 "Key grace"). `aud` is checked against the
/// caller-supplied expectation rather than a fixed single value, since
/// cross-client tokens carry a list.
pub fn decode_access_token(active_keys: &ActiveKeys, token: &str, expected_issuer: &str) -> Result<AccessTokenClaims, Error> {
    let header = jsonwebtoken::decode_header(token).map_err(|_| Error::access_denied("malformed token"))?;
    let kid = header.kid.ok_or_else(|| Error::access_denied("token missing kid"))?;
    let decoding_key = active_keys.decoding_key_for(&kid).ok_or_else(|| Error::access_denied("unknown signing key"))?;

    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.set_issuer(&[expected_issuer]);
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<AccessTokenClaims>(token, decoding_key, &validation).map_err(|_| Error::access_denied("invalid or expired token"))?;
    Ok(data.claims)
}

/// OIDC `at_hash`/`c_hash`: base64url(no-pad) of the left-most half of the
/// SHA-256 digest of the ASCII value (spec.md §4.7).
fn left_most_half_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let half = &digest[..digest.len() / 2];
    crate::util::b64url_encode(half)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_most_half_hash_is_stable() {
        let a = left_most_half_hash("abc123");
        let b = left_most_half_hash("abc123");
        assert_eq!(a, b);
        assert_ne!(a, left_most_half_hash("abc124"));
    }

    #[test]
    fn audience_claim_contains_checks_both_shapes() {
        let one = AudienceClaim::One("c1".to_string());
        assert!(one.contains("c1"));
        assert!(!one.contains("c2"));

        let many = AudienceClaim::Many(vec!["c1".to_string(), "c2".to_string()]);
        assert!(many.contains("c2"));
        assert!(!many.contains("c3"));
    }
}
