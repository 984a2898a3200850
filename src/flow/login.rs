//
// Login orchestrator (spec.md §4.5, C5). Grounded on the teacher's
// `exchange_code`/`redeem`/`AC_CACHE` callback-finalization shape
// (`src/sso.rs`), generalized from one SSO connector to the spec's
// connector-agnostic state machine.
//
use chrono::Utc;

use crate::connector::{ConnectorRegistry, Identity};
use crate::error::Error;
use crate::model::{AuthRequest, OfflineSession};
use crate::storage::Storage;

/// Records which connector the user chose (spec.md §4.5 "CREATED
/// --(connector chosen)--> LOGIN_DISPATCH"), enforcing the "immutable once
/// set" invariant via `AuthRequest::set_connector`.
pub async fn dispatch_to_connector(storage: &dyn Storage, auth_request_id: &str, connector_id: &str) -> Result<AuthRequest, Error> {
    storage
        .update_auth_request(
            auth_request_id,
            Box::new({
                let connector_id = connector_id.to_string();
                move |mut req: AuthRequest| {
                    req.set_connector(connector_id)?;
                    Ok(req)
                }
            }),
        )
        .await
}

/// Runs middleware over the connector-reported `Identity`, writes claims
/// back onto the `AuthRequest`, and - for `offline_access` against a
/// `Refresh` connector - ensures an `OfflineSession` exists (spec.md §4.5
/// "Finalization").
pub async fn finalize(storage: &dyn Storage, connectors: &ConnectorRegistry, auth_request_id: &str, identity: Identity) -> Result<AuthRequest, Error> {
    let req = storage.get_auth_request(auth_request_id).await?;
    if req.is_expired(Utc::now()) {
        return Err(Error::display(rocket::http::Status::Gone, "session expired"));
    }
    let connector_id = req.connector_id.clone().ok_or_else(|| Error::invalid_request("no connector chosen for this request"))?;

    let identity = connectors.finalize_identity(&connector_id, identity).await?;

    if req.scopes.iter().any(|s| s == "offline_access") {
        let is_refresh_capable = connectors.get(&connector_id).is_ok_and(|c| c.capabilities.refresh.is_some());
        if is_refresh_capable {
            ensure_offline_session(storage, &identity.claims.user_id, &connector_id, &identity.connector_data).await?;
        }
    }

    storage
        .update_auth_request(
            auth_request_id,
            Box::new(move |mut req: AuthRequest| {
                req.claims = identity.claims.clone();
                req.connector_data = identity.connector_data.clone();
                req.logged_in = true;
                Ok(req)
            }),
        )
        .await
}

async fn ensure_offline_session(storage: &dyn Storage, user_id: &str, connector_id: &str, connector_data: &serde_json::Value) -> Result<(), Error> {
    let connector_data = connector_data.clone();
    crate::util::retry_async(
        || {
            let connector_data = connector_data.clone();
            async move {
                storage
                    .upsert_offline_session(
                        user_id,
                        connector_id,
                        Box::new(move |mut session: OfflineSession| {
                            session.merge_connector_data(&connector_data);
                            Ok(session)
                        }),
                    )
                    .await
            }
        },
        crate::util::STORAGE_CONFLICT_RETRIES,
    )
    .await?;
    Ok(())
}

/// The HMAC-bound approval URL handed back once the `AuthRequest` is
/// logged in (spec.md §4.5).
pub fn approval_url(issuer: &str, req: &AuthRequest) -> String {
    let mac = crate::crypto::hmac_sha256(&req.hmac_key, req.id.as_bytes());
    format!("{issuer}/approval?req={}&hmac={}", req.id, crate::util::b64url_encode(&mac))
}

/// Whether approval can be skipped entirely: the Provider is configured to
/// skip it AND this request didn't set `force_approval` (spec.md §4.5).
pub fn can_skip_approval(config: &crate::config::Config, req: &AuthRequest) -> bool {
    config.skip_approval() && !req.force_approval
}
