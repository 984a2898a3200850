//
// In-memory reference `Storage` implementation (C13 test harness):
// `Mutex`-guarded maps, narrow surface, grounded on
// `mozilla-application-services/components/logins/src/store.rs`'s
// `Mutex<LoginDb>`-wrapped store shape. Used by integration tests and as a
// development backend; not a production storage engine (spec.md §1 scopes
// concrete backends out).
//
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::model::{AuthCode, AuthRequest, Client, ConnectorRecord, DeviceRequest, DeviceToken, Keys, OfflineSession, RefreshToken};

use super::{GcCounts, Storage, Updater};

#[derive(Default)]
struct Tables {
    auth_requests: HashMap<String, AuthRequest>,
    auth_codes: HashMap<String, AuthCode>,
    refresh_tokens: HashMap<String, RefreshToken>,
    offline_sessions: HashMap<String, OfflineSession>,
    device_requests_by_code: HashMap<String, DeviceRequest>,
    device_requests_by_user_code: HashMap<String, String>,
    device_tokens: HashMap<String, DeviceToken>,
    clients: HashMap<String, Client>,
    connectors: HashMap<String, ConnectorRecord>,
    keys: Option<Keys>,
}

pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

fn not_found(what: &str, id: &str) -> Error {
    Error::not_found(format!("{what} {id}"))
}

#[rocket::async_trait]
impl Storage for MemoryStorage {
    async fn create_auth_request(&self, req: AuthRequest) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.auth_requests.contains_key(&req.id) {
            return Err(Error::conflict("auth request already exists"));
        }
        t.auth_requests.insert(req.id.clone(), req);
        Ok(())
    }

    async fn get_auth_request(&self, id: &str) -> Result<AuthRequest, Error> {
        let t = self.tables.lock().unwrap();
        t.auth_requests.get(id).cloned().ok_or_else(|| not_found("auth request", id))
    }

    async fn update_auth_request(&self, id: &str, f: Updater<AuthRequest>) -> Result<AuthRequest, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.auth_requests.get(id).cloned().ok_or_else(|| not_found("auth request", id))?;
        let next = f(cur)?;
        t.auth_requests.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn delete_auth_request(&self, id: &str) -> Result<(), Error> {
        self.tables.lock().unwrap().auth_requests.remove(id);
        Ok(())
    }

    async fn create_auth_code(&self, code: AuthCode) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.auth_codes.contains_key(&code.id) {
            return Err(Error::conflict("auth code already exists"));
        }
        t.auth_codes.insert(code.id.clone(), code);
        Ok(())
    }

    async fn get_auth_code(&self, id: &str) -> Result<AuthCode, Error> {
        let t = self.tables.lock().unwrap();
        t.auth_codes.get(id).cloned().ok_or_else(|| not_found("auth code", id))
    }

    async fn delete_auth_code(&self, id: &str) -> Result<(), Error> {
        self.tables.lock().unwrap().auth_codes.remove(id);
        Ok(())
    }

    async fn create_refresh_token(&self, token: RefreshToken) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.refresh_tokens.contains_key(&token.id) {
            return Err(Error::conflict("refresh token already exists"));
        }
        t.refresh_tokens.insert(token.id.clone(), token);
        Ok(())
    }

    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, Error> {
        let t = self.tables.lock().unwrap();
        t.refresh_tokens.get(id).cloned().ok_or_else(|| not_found("refresh token", id))
    }

    async fn update_refresh_token(&self, id: &str, f: Updater<RefreshToken>) -> Result<RefreshToken, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.refresh_tokens.get(id).cloned().ok_or_else(|| not_found("refresh token", id))?;
        let next = f(cur)?;
        t.refresh_tokens.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn delete_refresh_token(&self, id: &str) -> Result<(), Error> {
        self.tables.lock().unwrap().refresh_tokens.remove(id);
        Ok(())
    }

    async fn list_refresh_tokens(&self) -> Result<Vec<RefreshToken>, Error> {
        Ok(self.tables.lock().unwrap().refresh_tokens.values().cloned().collect())
    }

    async fn get_offline_session(&self, user_id: &str, connector_id: &str) -> Result<OfflineSession, Error> {
        let key = OfflineSession::key(user_id, connector_id);
        let t = self.tables.lock().unwrap();
        t.offline_sessions.get(&key).cloned().ok_or_else(|| not_found("offline session", &key))
    }

    async fn upsert_offline_session(&self, user_id: &str, connector_id: &str, f: Updater<OfflineSession>) -> Result<OfflineSession, Error> {
        let key = OfflineSession::key(user_id, connector_id);
        let mut t = self.tables.lock().unwrap();
        let cur = t.offline_sessions.get(&key).cloned().unwrap_or_else(|| OfflineSession {
            user_id: user_id.to_string(),
            connector_id: connector_id.to_string(),
            ..Default::default()
        });
        let next = f(cur)?;
        t.offline_sessions.insert(key, next.clone());
        Ok(next)
    }

    async fn create_device_request(&self, req: DeviceRequest) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.device_requests_by_code.contains_key(&req.device_code) {
            return Err(Error::conflict("device request already exists"));
        }
        t.device_requests_by_user_code.insert(req.user_code.clone(), req.device_code.clone());
        t.device_requests_by_code.insert(req.device_code.clone(), req);
        Ok(())
    }

    async fn get_device_request_by_user_code(&self, user_code: &str) -> Result<DeviceRequest, Error> {
        let t = self.tables.lock().unwrap();
        let device_code = t.device_requests_by_user_code.get(user_code).cloned().ok_or_else(|| not_found("device request", user_code))?;
        t.device_requests_by_code.get(&device_code).cloned().ok_or_else(|| not_found("device request", user_code))
    }

    async fn get_device_request(&self, device_code: &str) -> Result<DeviceRequest, Error> {
        let t = self.tables.lock().unwrap();
        t.device_requests_by_code.get(device_code).cloned().ok_or_else(|| not_found("device request", device_code))
    }

    async fn delete_device_request(&self, device_code: &str) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if let Some(req) = t.device_requests_by_code.remove(device_code) {
            t.device_requests_by_user_code.remove(&req.user_code);
        }
        Ok(())
    }

    async fn create_device_token(&self, token: DeviceToken) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.device_tokens.contains_key(&token.device_code) {
            return Err(Error::conflict("device token already exists"));
        }
        t.device_tokens.insert(token.device_code.clone(), token);
        Ok(())
    }

    async fn get_device_token(&self, device_code: &str) -> Result<DeviceToken, Error> {
        let t = self.tables.lock().unwrap();
        t.device_tokens.get(device_code).cloned().ok_or_else(|| not_found("device token", device_code))
    }

    async fn update_device_token(&self, device_code: &str, f: Updater<DeviceToken>) -> Result<DeviceToken, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.device_tokens.get(device_code).cloned().ok_or_else(|| not_found("device token", device_code))?;
        let next = f(cur)?;
        t.device_tokens.insert(device_code.to_string(), next.clone());
        Ok(next)
    }

    async fn create_client(&self, client: Client) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.clients.contains_key(&client.id) {
            return Err(Error::conflict("client already exists"));
        }
        t.clients.insert(client.id.clone(), client);
        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Client, Error> {
        let t = self.tables.lock().unwrap();
        t.clients.get(id).cloned().ok_or_else(|| not_found("client", id))
    }

    async fn update_client(&self, id: &str, f: Updater<Client>) -> Result<Client, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.clients.get(id).cloned().ok_or_else(|| not_found("client", id))?;
        let next = f(cur)?;
        t.clients.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn delete_client(&self, id: &str) -> Result<(), Error> {
        self.tables.lock().unwrap().clients.remove(id);
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<Client>, Error> {
        Ok(self.tables.lock().unwrap().clients.values().cloned().collect())
    }

    async fn create_connector(&self, connector: ConnectorRecord) -> Result<(), Error> {
        let mut t = self.tables.lock().unwrap();
        if t.connectors.contains_key(&connector.id) {
            return Err(Error::conflict("connector already exists"));
        }
        t.connectors.insert(connector.id.clone(), connector);
        Ok(())
    }

    async fn get_connector(&self, id: &str) -> Result<ConnectorRecord, Error> {
        let t = self.tables.lock().unwrap();
        t.connectors.get(id).cloned().ok_or_else(|| not_found("connector", id))
    }

    async fn update_connector(&self, id: &str, f: Updater<ConnectorRecord>) -> Result<ConnectorRecord, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.connectors.get(id).cloned().ok_or_else(|| not_found("connector", id))?;
        let next = f(cur)?;
        t.connectors.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn delete_connector(&self, id: &str) -> Result<(), Error> {
        self.tables.lock().unwrap().connectors.remove(id);
        Ok(())
    }

    async fn list_connectors(&self) -> Result<Vec<ConnectorRecord>, Error> {
        Ok(self.tables.lock().unwrap().connectors.values().cloned().collect())
    }

    async fn get_keys(&self) -> Result<Keys, Error> {
        let t = self.tables.lock().unwrap();
        t.keys.clone().ok_or_else(|| Error::server_error("no signing key materialized yet"))
    }

    async fn update_keys(&self, f: Updater<Keys>) -> Result<Keys, Error> {
        let mut t = self.tables.lock().unwrap();
        let cur = t.keys.clone().unwrap_or_else(placeholder_keys);
        let next = f(cur)?;
        t.keys = Some(next.clone());
        Ok(next)
    }

    async fn garbage_collect(&self, now: DateTime<Utc>) -> Result<GcCounts, Error> {
        let mut t = self.tables.lock().unwrap();
        let mut counts = GcCounts::default();

        let expired_auth_requests: Vec<String> = t.auth_requests.iter().filter(|(_, r)| r.is_expired(now)).map(|(k, _)| k.clone()).collect();
        for id in expired_auth_requests {
            t.auth_requests.remove(&id);
            counts.auth_requests += 1;
        }

        let expired_auth_codes: Vec<String> = t.auth_codes.iter().filter(|(_, c)| c.is_expired(now)).map(|(k, _)| k.clone()).collect();
        for id in expired_auth_codes {
            t.auth_codes.remove(&id);
            counts.auth_codes += 1;
        }

        let expired_device_requests: Vec<String> = t.device_requests_by_code.iter().filter(|(_, r)| r.is_expired(now)).map(|(k, _)| k.clone()).collect();
        for device_code in expired_device_requests {
            if let Some(req) = t.device_requests_by_code.remove(&device_code) {
                t.device_requests_by_user_code.remove(&req.user_code);
            }
            counts.device_requests += 1;
        }

        let expired_device_tokens: Vec<String> = t.device_tokens.iter().filter(|(_, tok)| tok.is_expired(now)).map(|(k, _)| k.clone()).collect();
        for device_code in expired_device_tokens {
            t.device_tokens.remove(&device_code);
            counts.device_tokens += 1;
        }

        Ok(counts)
    }
}

/// Placeholder passed into the first `update_keys` call so the rotation
/// strategy (C2) always sees a "rotation is overdue" starting point and
/// generates real key material on the very first tick.
fn placeholder_keys() -> Keys {
    Keys {
        signing_key_pem: String::new(),
        signing_key_pub_der: Vec::new(),
        signing_kid: String::new(),
        verification_keys: Vec::new(),
        next_rotation: DateTime::<Utc>::MIN_UTC,
    }
}
