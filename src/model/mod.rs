//
// Data model (spec.md §3): every entity the storage contract (C1) persists,
// plus the small value types (PKCE, identity) threaded through the flow
// engine. Field shapes match the teacher's newtype-heavy style
// (`src/sso.rs`'s `OIDCCode`/`OIDCState`) where a value crosses a wire
// boundary, plain structs otherwise.
//
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered relying party (spec.md §3 "Client").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub trusted_peers: Vec<String>,
    pub public: bool,
    pub logo_url: Option<String>,
    pub name: String,
}

impl Client {
    pub fn requires_secret(&self) -> bool {
        !self.public
    }

    pub fn accepts_redirect_uri(&self, uri: &str) -> bool {
        uri == OOB_REDIRECT_URI || self.redirect_uris.iter().any(|r| r == uri)
    }

    /// The peers to actually put in `aud` for this request: the
    /// `audience:server:client_id:*` scopes the caller asked for, narrowed to
    /// the ones this client is configured to trust (spec.md §6 "if
    /// cross-client scopes are present"). A client's full `trusted_peers`
    /// list is never exposed unless the request asked for it.
    pub fn cross_client_peers(&self, scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .filter_map(|s| s.strip_prefix("audience:server:client_id:"))
            .filter(|peer| self.trusted_peers.iter().any(|p| p == peer))
            .map(str::to_string)
            .collect()
    }
}

/// The special redirect URI value causing a code to be rendered to the user
/// rather than redirected (spec.md GLOSSARY "OOB redirect").
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Which capability set a `Connector` record implies (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Callback,
    Password,
    Saml,
    Refresh,
    TokenIdentity,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: String,
    pub kind: ConnectorType,
    pub name: String,
    pub config: serde_json::Value,
    pub resource_version: u64,
}

/// PKCE challenge material attached to an `AuthRequest`/`AuthCode`/
/// `DeviceRequest` (spec.md §4.7).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceRequest {
    pub challenge: String,
    pub method: PkceMethod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkceMethod {
    Plain,
    S256,
}

impl PkceMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "S256" => Some(Self::S256),
            _ => None,
        }
    }
}

/// Claims recovered from a connector's `Identity` and carried through to
/// token minting (subset of spec.md §4.7's scoped claims).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub groups: Vec<String>,
    pub preferred_username: Option<String>,
}

/// The in-flight authorization session created at `/auth` (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthRequest {
    pub id: String,
    pub client_id: String,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub state: Option<String>,
    pub force_approval: bool,
    pub logged_in: bool,
    pub claims: Claims,
    pub connector_id: Option<String>,
    pub connector_data: serde_json::Value,
    pub hmac_key: Vec<u8>,
    pub pkce: Option<PkceRequest>,
    pub expiry: DateTime<Utc>,
}

impl AuthRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Sets `connector_id`, enforcing spec.md §3's "once set, immutable"
    /// invariant for the request's lifetime.
    pub fn set_connector(&mut self, connector_id: String) -> Result<(), crate::error::Error> {
        match &self.connector_id {
            Some(existing) if existing != &connector_id => Err(crate::error::Error::invalid_request("connector already chosen for this request")),
            _ => {
                self.connector_id = Some(connector_id);
                Ok(())
            }
        }
    }
}

/// A one-shot bearer for code-flow exchange (spec.md §3 "AuthCode").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthCode {
    pub id: String,
    pub client_id: String,
    pub connector_id: String,
    pub nonce: Option<String>,
    pub scopes: Vec<String>,
    pub claims: Claims,
    pub redirect_uri: String,
    pub connector_data: serde_json::Value,
    pub pkce: Option<PkceRequest>,
    pub expiry: DateTime<Utc>,
}

impl AuthCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// `spec.md` §3 "RefreshToken". `id` names the record; `token` is the
/// current opaque value a client must present; `obsolete_token` is retained
/// during the reuse interval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub token: String,
    pub obsolete_token: Option<String>,
    pub nonce: Option<String>,
    pub client_id: String,
    pub connector_id: String,
    pub scopes: Vec<String>,
    pub claims: Claims,
    pub connector_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// A reference to a live `RefreshToken` held by an `OfflineSession`
/// (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshTokenRef {
    pub refresh_id: String,
}

/// Per-`(user_id, connector_id)` aggregate of live refresh references
/// (spec.md §3 "OfflineSession").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OfflineSession {
    pub user_id: String,
    pub connector_id: String,
    pub refresh: std::collections::HashMap<String, RefreshTokenRef>,
    pub connector_data: serde_json::Value,
}

impl OfflineSession {
    pub fn key(user_id: &str, connector_id: &str) -> String {
        format!("{user_id}:{connector_id}")
    }

    /// "Overwrite when the new value is non-empty, else keep existing"
    /// (SPEC_FULL.md §4 resolves the spec's open question this way).
    pub fn merge_connector_data(&mut self, incoming: &serde_json::Value) {
        let (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) = (&mut self.connector_data, incoming) else {
            if !matches!(incoming, serde_json::Value::Null) {
                self.connector_data = incoming.clone();
            }
            return;
        };
        for (k, v) in incoming {
            if !v.is_null() {
                existing.insert(k.clone(), v.clone());
            }
        }
    }
}

/// `spec.md` §3 "DeviceRequest".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub pkce: Option<PkceRequest>,
    pub expiry: DateTime<Utc>,
}

impl DeviceRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTokenStatus {
    Pending,
    Complete,
}

/// The token-response payload stashed once a device flow completes, so a
/// polling device receives the exact bytes the browser-side exchange
/// produced (spec.md §4.9 "`/device/callback`").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceToken {
    pub device_code: String,
    pub status: DeviceTokenStatus,
    pub token: Option<serde_json::Value>,
    pub expiry: DateTime<Utc>,
    pub last_request_time: DateTime<Utc>,
    pub poll_interval_seconds: i64,
    pub pkce: Option<PkceRequest>,
}

impl DeviceToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Monotonic pending -> complete transition (spec.md §8 invariant 8).
    pub fn complete(&mut self, token: serde_json::Value) -> Result<(), crate::error::Error> {
        if self.status == DeviceTokenStatus::Complete {
            return Err(crate::error::Error::conflict("device token already complete"));
        }
        self.status = DeviceTokenStatus::Complete;
        self.token = Some(token);
        Ok(())
    }
}

/// `spec.md` §3 "Keys": the rotating RSA signing-key subsystem's persisted
/// state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Keys {
    pub signing_key_pem: String,
    pub signing_key_pub_der: Vec<u8>,
    pub signing_kid: String,
    pub verification_keys: Vec<VerificationKey>,
    pub next_rotation: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationKey {
    pub kid: String,
    pub public_der: Vec<u8>,
    pub retired_at: DateTime<Utc>,
}
