//
// Connector registry (spec.md §4.3, C3). Capabilities are an open
// polymorphic set (spec.md §9 "Connector capabilities") rather than a
// monolithic interface, grounded on the teacher's `CoreClientExt`
// trait-extension pattern (`src/sso.rs`) generalized from "one SSO
// connector" to several capability traits a connector may mix in.
//
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::model::Claims;

/// What a connector returned about the authenticated user, before
/// middleware runs (spec.md §4.5).
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub claims: Claims,
    pub connector_data: Value,
}

/// Redirect-based login (spec.md §3 "Callback").
#[async_trait]
pub trait CallbackConnector: Send + Sync {
    fn login_url(&self, callback_url: &str, state: &str) -> Result<String, Error>;
    async fn handle_callback(&self, query: &HashMap<String, String>) -> Result<Identity, Error>;
}

/// Credential-submission login (spec.md §3 "Password").
#[async_trait]
pub trait PasswordConnector: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Identity, Error>;
}

/// SAML POST-binding login (spec.md §3 "SAML").
#[async_trait]
pub trait SamlConnector: Send + Sync {
    fn request_form_html(&self, callback_url: &str, relay_state: &str) -> String;
    async fn handle_assertion(&self, saml_response: &str) -> Result<Identity, Error>;
}

/// Re-verifies an already-authenticated identity (spec.md §3 "Refresh",
/// §4.8 step 4).
#[async_trait]
pub trait RefreshConnector: Send + Sync {
    async fn refresh(&self, prior: &Identity) -> Result<Identity, Error>;
}

/// Verifies a caller-presented subject token (spec.md §3 "TokenIdentity",
/// §4.7 token-exchange grant).
#[async_trait]
pub trait TokenIdentityConnector: Send + Sync {
    async fn verify_subject_token(&self, token: &str, token_type: &str) -> Result<Identity, Error>;
}

/// A step in the login finalization pipeline (spec.md §4.5): takes the
/// `Identity` a connector returned and yields a transformed one, or an
/// error that fails the login.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn apply(&self, identity: Identity) -> Result<Identity, Error>;
}

/// A connector may implement any subset of the capability traits above.
/// Call sites narrow to the capability they need and fail with
/// `invalid_request` if it is absent (spec.md §9).
#[derive(Default)]
pub struct ConnectorCapabilities {
    pub callback: Option<Box<dyn CallbackConnector>>,
    pub password: Option<Box<dyn PasswordConnector>>,
    pub saml: Option<Box<dyn SamlConnector>>,
    pub refresh: Option<Box<dyn RefreshConnector>>,
    pub token_identity: Option<Box<dyn TokenIdentityConnector>>,
}

pub struct OpenConnector {
    pub id: String,
    pub name: String,
    pub capabilities: ConnectorCapabilities,
    /// Connector-specific middleware, run before the global chain
    /// (spec.md §4.5 "Ordering is connector-first, then global").
    pub middleware: Vec<Box<dyn Middleware>>,
}

impl OpenConnector {
    pub fn require_callback(&self) -> Result<&dyn CallbackConnector, Error> {
        self.capabilities.callback.as_deref().ok_or_else(|| Error::invalid_request("connector does not support callback login"))
    }

    pub fn require_password(&self) -> Result<&dyn PasswordConnector, Error> {
        self.capabilities.password.as_deref().ok_or_else(|| Error::invalid_request("connector does not support password login"))
    }

    pub fn require_saml(&self) -> Result<&dyn SamlConnector, Error> {
        self.capabilities.saml.as_deref().ok_or_else(|| Error::invalid_request("connector does not support SAML login"))
    }

    pub fn require_refresh(&self) -> Result<&dyn RefreshConnector, Error> {
        self.capabilities.refresh.as_deref().ok_or_else(|| Error::invalid_request("connector does not support refresh"))
    }

    pub fn require_token_identity(&self) -> Result<&dyn TokenIdentityConnector, Error> {
        self.capabilities.token_identity.as_deref().ok_or_else(|| Error::invalid_request("connector does not support token-identity verification"))
    }
}

/// Runs `global` after `connector`-specific middleware, per step,
/// short-circuiting on the first error (spec.md §4.5).
pub async fn run_middleware_chain(connector: &[Box<dyn Middleware>], global: &[Box<dyn Middleware>], mut identity: Identity) -> Result<Identity, Error> {
    for step in connector.iter().chain(global.iter()) {
        identity = step.apply(identity).await?;
    }
    Ok(identity)
}

/// In-process registry of opened connectors (spec.md §4.3). Connectors are
/// held behind `Arc` so a lookup can clone the handle and release the read
/// lock before any `.await` — the registry's `RwLock` must never be held
/// across a suspension point (spec.md §5). Config reload takes the write
/// lock only for the duration of the swap; readers never block each other
/// (spec.md §5 "writers ... block only themselves").
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<OpenConnector>>>,
    global_middleware: RwLock<Arc<Vec<Box<dyn Middleware>>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connector: OpenConnector) {
        self.connectors.write().unwrap().insert(connector.id.clone(), Arc::new(connector));
    }

    pub fn set_global_middleware(&self, middleware: Vec<Box<dyn Middleware>>) {
        *self.global_middleware.write().unwrap() = Arc::new(middleware);
    }

    pub fn get(&self, id: &str) -> Result<Arc<OpenConnector>, Error> {
        self.connectors.read().unwrap().get(id).cloned().ok_or_else(|| Error::invalid_request(format!("unknown connector {id}")))
    }

    pub fn with_connector<T>(&self, id: &str, f: impl FnOnce(&OpenConnector) -> Result<T, Error>) -> Result<T, Error> {
        f(self.get(id)?.as_ref())
    }

    pub async fn finalize_identity(&self, connector_id: &str, identity: Identity) -> Result<Identity, Error> {
        let connector = self.get(connector_id)?;
        let global = self.global_middleware.read().unwrap().clone();
        run_middleware_chain(&connector.middleware, &global, identity).await
    }

    /// Re-verifies `prior` through `connector_id`'s `Refresh` capability if
    /// it has one, returning `Ok(None)` when it doesn't (spec.md §4.8 step
    /// 4: "Re-run the connector's Refresh(identity) if the connector is
    /// Refresh").
    pub async fn refresh_identity(&self, connector_id: &str, prior: &Identity) -> Result<Option<Identity>, Error> {
        let connector = self.get(connector_id)?;
        match &connector.capabilities.refresh {
            Some(refresher) => Ok(Some(refresher.refresh(prior).await?)),
            None => Ok(None),
        }
    }
}
