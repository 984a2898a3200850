//
// Flow engine (spec.md §2 control flow: C4 -> C5 -> C6 -> C7 -> C8, plus
// C9's parallel device-flow state machine). Each submodule owns one
// component; `src/http/` adapts these to Rocket routes.
//
pub mod approval;
pub mod authorize;
pub mod device;
pub mod login;
pub mod refresh;
pub mod token;

use std::sync::Arc;

use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::keys::KeyCache;
use crate::storage::Storage;

/// Everything a flow handler needs, threaded through as Rocket managed
/// state (spec.md §5: handlers hold no long-lived locks, only references
/// to these shared, internally-synchronized services).
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub keys: Arc<KeyCache>,
    pub connectors: Arc<ConnectorRegistry>,
    pub config: &'static Config,
}
