//
// Device-flow state machine (spec.md §4.9, C9). Grounded on the teacher's
// two-factor "remember" polling loop (`src/api/core/two_factor/mod.rs`'s
// rate-limited retry shape), generalized to RFC 8628's device-code grant.
//
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::config::Config;
use crate::error::Error;
use crate::model::{DeviceRequest, DeviceToken, DeviceTokenStatus, PkceRequest};
use crate::storage::Storage;
use crate::util::get_uuid;

const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Default, rocket::FromForm)]
pub struct DeviceCodeParams {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let group = |rng: &mut rand::rngs::ThreadRng| -> String { (0..4).map(|_| *USER_CODE_ALPHABET.choose(rng).expect("alphabet is non-empty") as char).collect() };
    format!("{}-{}", group(&mut rng), group(&mut rng))
}

/// `POST /device/code` (spec.md §4.9): issues the opaque `device_code` and
/// human-friendly `user_code` pair, and the paired pending `DeviceToken`.
pub async fn start(storage: &dyn Storage, config: &Config, issuer: &str, params: DeviceCodeParams) -> Result<DeviceCodeResponse, Error> {
    let client_id = params.client_id.ok_or_else(|| Error::invalid_request("missing client_id"))?;
    storage.get_client(&client_id).await.map_err(|_| Error::invalid_client("unknown client"))?;

    let scopes: Vec<String> = params.scope.as_deref().unwrap_or("openid").split_whitespace().map(str::to_string).collect();

    let pkce = match (&params.code_challenge, &params.code_challenge_method) {
        (Some(challenge), Some(method)) => {
            let method = crate::model::PkceMethod::parse(method).ok_or_else(|| Error::invalid_request("unsupported code_challenge_method"))?;
            Some(PkceRequest { challenge: challenge.clone(), method })
        }
        (None, None) => None,
        _ => return Err(Error::invalid_request("code_challenge and code_challenge_method must be provided together")),
    };

    let device_code = get_uuid();
    let user_code = generate_user_code();
    let now = Utc::now();
    let expiry = now + config.device_valid_for();

    storage
        .create_device_request(DeviceRequest {
            device_code: device_code.clone(),
            user_code: user_code.clone(),
            client_id,
            client_secret: params.client_secret,
            scopes,
            pkce: pkce.clone(),
            expiry,
        })
        .await?;

    storage
        .create_device_token(DeviceToken {
            device_code: device_code.clone(),
            status: DeviceTokenStatus::Pending,
            token: None,
            expiry,
            last_request_time: now,
            poll_interval_seconds: config.device_poll_interval_seconds(),
            pkce,
        })
        .await?;

    Ok(DeviceCodeResponse {
        device_code,
        user_code: user_code.clone(),
        verification_uri: format!("{issuer}/device"),
        verification_uri_complete: format!("{issuer}/device?user_code={user_code}"),
        expires_in: (expiry - now).num_seconds(),
        interval: config.device_poll_interval_seconds(),
    })
}

/// `POST /token grant_type=urn:ietf:params:oauth:grant-type:device_code`
/// (spec.md §4.9): expiry, rate limiting, pending/complete dispatch, and
/// (on completion) the PKCE check against the originally-issued challenge.
pub async fn poll(storage: &dyn Storage, config: &Config, device_code: &str, code_verifier: Option<&str>) -> Result<serde_json::Value, Error> {
    let now = Utc::now();
    let token_record = storage.get_device_token(device_code).await.map_err(|_| Error::invalid_grant("unknown device_code"))?;

    if token_record.is_expired(now) {
        return Err(Error::expired_token());
    }

    let min_time = token_record.last_request_time + chrono::Duration::seconds(token_record.poll_interval_seconds);
    if now < min_time {
        let increment = config.device_poll_increment_seconds();
        storage
            .update_device_token(
                device_code,
                Box::new(move |mut t: DeviceToken| {
                    t.poll_interval_seconds += increment;
                    t.last_request_time = now;
                    Ok(t)
                }),
            )
            .await?;
        return Err(Error::slow_down());
    }

    let base_interval = config.device_poll_interval_seconds();
    let updated = storage
        .update_device_token(
            device_code,
            Box::new(move |mut t: DeviceToken| {
                t.poll_interval_seconds = base_interval;
                t.last_request_time = now;
                Ok(t)
            }),
        )
        .await?;

    match updated.status {
        DeviceTokenStatus::Pending => Err(Error::authorization_pending()),
        DeviceTokenStatus::Complete => {
            crate::flow::token::verify_pkce(updated.pkce.as_ref(), code_verifier, updated.pkce.is_some())?;
            updated.token.ok_or_else(|| Error::internal("completed device token has no stored payload"))
        }
    }
}

/// `/device` verification-code submission: resolves a human-entered
/// `user_code` back to its `DeviceRequest` (spec.md §4.9 "verification_uri").
pub async fn lookup_by_user_code(storage: &dyn Storage, user_code: &str) -> Result<DeviceRequest, Error> {
    let normalized = user_code.trim().to_uppercase();
    storage.get_device_request_by_user_code(&normalized).await.map_err(|_| Error::display(rocket::http::Status::NotFound, "unknown or expired code"))
}

/// `/device/callback` (spec.md §4.9): marshals the completed OIDC
/// exchange's token response into the `DeviceToken` it was started for,
/// atomically transitioning pending -> complete. A second completion
/// attempt surfaces `DeviceToken::complete`'s conflict error.
pub async fn complete(storage: &dyn Storage, device_code: &str, token_response: &serde_json::Value) -> Result<(), Error> {
    let payload = token_response.clone();
    crate::util::retry_async(
        || {
            let payload = payload.clone();
            async move {
                storage
                    .update_device_token(
                        device_code,
                        Box::new(move |mut t: DeviceToken| {
                            t.complete(payload.clone())?;
                            Ok(t)
                        }),
                    )
                    .await
            }
        },
        crate::util::STORAGE_CONFLICT_RETRIES,
    )
    .await?;
    storage.delete_device_request(device_code).await.or_else(|e| if matches!(e, Error::NotFound(_)) { Ok(()) } else { Err(e) })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    async fn client_fixture(storage: &MemoryStorage) {
        storage
            .create_client(crate::model::Client {
                id: "c1".to_string(),
                secret: Some("s".to_string()),
                redirect_uris: vec![],
                trusted_peers: vec![],
                public: true,
                logo_url: None,
                name: "Device Client".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pending_poll_returns_authorization_pending() {
        let storage = MemoryStorage::new();
        client_fixture(&storage).await;
        let config = Config::load().unwrap();

        let started = start(
            &storage,
            &config,
            "https://issuer",
            DeviceCodeParams {
                client_id: Some("c1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = poll(&storage, &config, &started.device_code, None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: crate::error::OAuth2ErrorCode::AuthorizationPending, .. }));
    }

    #[tokio::test]
    async fn rapid_repolling_triggers_slow_down() {
        let storage = MemoryStorage::new();
        client_fixture(&storage).await;
        let config = Config::load().unwrap();

        let started = start(
            &storage,
            &config,
            "https://issuer",
            DeviceCodeParams {
                client_id: Some("c1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // First poll respects the interval (last_request_time == now), so an
        // immediate second poll must land inside the window.
        let _ = poll(&storage, &config, &started.device_code, None).await;
        let err = poll(&storage, &config, &started.device_code, None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: crate::error::OAuth2ErrorCode::SlowDown, .. }));
    }

    #[tokio::test]
    async fn completing_twice_fails() {
        let storage = MemoryStorage::new();
        client_fixture(&storage).await;
        let config = Config::load().unwrap();

        let started = start(
            &storage,
            &config,
            "https://issuer",
            DeviceCodeParams {
                client_id: Some("c1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        complete(&storage, &started.device_code, &serde_json::json!({"access_token": "a"})).await.unwrap();
        let err = complete(&storage, &started.device_code, &serde_json::json!({"access_token": "b"})).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
