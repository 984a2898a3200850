//
// Storage contract (spec.md §4.1, C1). A plain async trait rather than
// concrete Diesel code — the spec scopes concrete backends out ("only the
// storage interface is specified"), so this is grounded on the *shape* of
// the teacher's async connection-pool access (`src/db/mod.rs`) and on
// `mozilla-application-services/components/logins/src/store.rs`'s
// narrow, trait-shaped `Store` API.
//
pub mod memory;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::model::{AuthCode, AuthRequest, Client, ConnectorRecord, DeviceRequest, DeviceToken, Keys, OfflineSession, RefreshToken};

/// Counts returned by `garbage_collect` (spec.md §4.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct GcCounts {
    pub auth_requests: u64,
    pub auth_codes: u64,
    pub device_requests: u64,
    pub device_tokens: u64,
}

/// An updater is applied by the backend with optimistic concurrency; on a
/// losing race the backend returns `Error::conflict`, which callers retry
/// through `crate::util::retry_async` (spec.md §4.1, §5, §7).
pub type Updater<T> = Box<dyn FnOnce(T) -> Result<T, Error> + Send>;

#[rocket::async_trait]
pub trait Storage: Send + Sync {
    // --- AuthRequest ---
    async fn create_auth_request(&self, req: AuthRequest) -> Result<(), Error>;
    async fn get_auth_request(&self, id: &str) -> Result<AuthRequest, Error>;
    async fn update_auth_request(&self, id: &str, f: Updater<AuthRequest>) -> Result<AuthRequest, Error>;
    async fn delete_auth_request(&self, id: &str) -> Result<(), Error>;

    // --- AuthCode ---
    async fn create_auth_code(&self, code: AuthCode) -> Result<(), Error>;
    async fn get_auth_code(&self, id: &str) -> Result<AuthCode, Error>;
    async fn delete_auth_code(&self, id: &str) -> Result<(), Error>;

    // --- RefreshToken ---
    async fn create_refresh_token(&self, token: RefreshToken) -> Result<(), Error>;
    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, Error>;
    async fn update_refresh_token(&self, id: &str, f: Updater<RefreshToken>) -> Result<RefreshToken, Error>;
    async fn delete_refresh_token(&self, id: &str) -> Result<(), Error>;
    async fn list_refresh_tokens(&self) -> Result<Vec<RefreshToken>, Error>;

    // --- OfflineSession ---
    async fn get_offline_session(&self, user_id: &str, connector_id: &str) -> Result<OfflineSession, Error>;
    /// Creates the session if missing, otherwise applies `f` to the existing
    /// value; either way returns the resulting session (spec.md §4.5's
    /// "ensure an OfflineSession exists ... create if missing, else merge").
    async fn upsert_offline_session(&self, user_id: &str, connector_id: &str, f: Updater<OfflineSession>) -> Result<OfflineSession, Error>;

    // --- DeviceRequest / DeviceToken ---
    async fn create_device_request(&self, req: DeviceRequest) -> Result<(), Error>;
    async fn get_device_request_by_user_code(&self, user_code: &str) -> Result<DeviceRequest, Error>;
    async fn get_device_request(&self, device_code: &str) -> Result<DeviceRequest, Error>;
    async fn delete_device_request(&self, device_code: &str) -> Result<(), Error>;

    async fn create_device_token(&self, token: DeviceToken) -> Result<(), Error>;
    async fn get_device_token(&self, device_code: &str) -> Result<DeviceToken, Error>;
    async fn update_device_token(&self, device_code: &str, f: Updater<DeviceToken>) -> Result<DeviceToken, Error>;

    // --- Client ---
    async fn create_client(&self, client: Client) -> Result<(), Error>;
    async fn get_client(&self, id: &str) -> Result<Client, Error>;
    async fn update_client(&self, id: &str, f: Updater<Client>) -> Result<Client, Error>;
    async fn delete_client(&self, id: &str) -> Result<(), Error>;
    async fn list_clients(&self) -> Result<Vec<Client>, Error>;

    // --- Connector ---
    async fn create_connector(&self, connector: ConnectorRecord) -> Result<(), Error>;
    async fn get_connector(&self, id: &str) -> Result<ConnectorRecord, Error>;
    async fn update_connector(&self, id: &str, f: Updater<ConnectorRecord>) -> Result<ConnectorRecord, Error>;
    async fn delete_connector(&self, id: &str) -> Result<(), Error>;
    async fn list_connectors(&self) -> Result<Vec<ConnectorRecord>, Error>;

    // --- Keys ---
    async fn get_keys(&self) -> Result<Keys, Error>;
    async fn update_keys(&self, f: Updater<Keys>) -> Result<Keys, Error>;

    // --- Garbage collection ---
    async fn garbage_collect(&self, now: DateTime<Utc>) -> Result<GcCounts, Error>;
}
