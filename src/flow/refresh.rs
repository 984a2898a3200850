//
// Refresh subsystem (spec.md §4.8, C8). Grounded on the teacher's
// `exchange_refresh_token`/`_create_auth_tokens` rotation handling
// (`src/sso.rs`), generalized to the spec's reuse-interval/offline-session
// rules.
//
use chrono::Utc;

use crate::config::Config;
use crate::connector::{ConnectorRegistry, Identity};
use crate::crypto::get_random_64;
use crate::error::Error;
use crate::model::{OfflineSession, RefreshToken, RefreshTokenRef as OfflineRefreshRef};
use crate::proto::RefreshTokenRef;
use crate::storage::Storage;
use crate::util::{b64url_encode, get_uuid};

pub struct RotatedRefresh {
    pub wire_token: String,
    pub record: RefreshToken,
}

/// Parses the wire refresh token, applies the absolute/idle/reuse-interval
/// policy, re-verifies identity through the connector if it's a `Refresh`
/// connector, and — when rotation is enabled — swaps in a new token value
/// (spec.md §4.8 steps 1-5).
pub async fn exchange(storage: &dyn Storage, connectors: &ConnectorRegistry, config: &Config, client_id: &str, wire_token: &str, requested_scopes: Option<&[String]>) -> Result<RotatedRefresh, Error> {
    let parsed = RefreshTokenRef::decode_b64url(wire_token)?;

    let record = storage.get_refresh_token(&parsed.refresh_id).await.map_err(|_| Error::invalid_grant("unknown refresh token"))?;
    if record.client_id != client_id {
        return Err(Error::invalid_grant("refresh token was not issued to this client"));
    }

    let now = Utc::now();

    if let Some(absolute) = config.refresh_absolute_lifetime() {
        if now - record.created_at > absolute {
            revoke(storage, &record).await?;
            return Err(Error::invalid_grant("refresh token exceeded its absolute lifetime"));
        }
    }
    if let Some(idle) = config.refresh_valid_if_not_used_for() {
        if now - record.last_used > idle {
            revoke(storage, &record).await?;
            return Err(Error::invalid_grant("refresh token has been idle too long"));
        }
    }

    let within_reuse_interval = record.obsolete_token.is_some() && now - record.last_used <= config.refresh_reuse_interval();

    let presented_matches_current = crate::crypto::ct_eq(parsed.token.as_bytes(), record.token.as_bytes());
    let presented_matches_obsolete = record.obsolete_token.as_deref().is_some_and(|obsolete| crate::crypto::ct_eq(parsed.token.as_bytes(), obsolete.as_bytes()));

    let accepted = if config.refresh_rotate() {
        presented_matches_current || (within_reuse_interval && presented_matches_obsolete)
    } else {
        presented_matches_current
    };

    if !accepted {
        if presented_matches_obsolete {
            // Beyond the reuse interval: this is the reuse-attack case
            // (spec.md §4.8 step 3, §8 scenario S4) — cascade-revoke.
            revoke(storage, &record).await?;
        }
        return Err(Error::invalid_grant("refresh token is stale or invalid"));
    }

    let mut claims = record.claims.clone();
    let mut connector_data = record.connector_data.clone();
    let prior = Identity {
        claims: record.claims.clone(),
        connector_data: record.connector_data.clone(),
    };
    if let Some(identity) = connectors.refresh_identity(&record.connector_id, &prior).await? {
        let original_user_id = claims.user_id.clone();
        claims = identity.claims;
        claims.user_id = original_user_id; // spec.md §4.8 step 4: user_id MUST NOT change
        connector_data = identity.connector_data;
    }

    let scopes = match requested_scopes {
        Some(requested) => record.scopes.iter().filter(|s| requested.contains(s)).cloned().collect(),
        None => record.scopes.clone(),
    };

    let new_wire_token = if config.refresh_rotate() {
        let fresh_secret = b64url_encode(&get_random_64());
        let id = record.id.clone();
        let updated = crate::util::retry_async(
            || {
                let claims = claims.clone();
                let connector_data = connector_data.clone();
                let fresh_secret = fresh_secret.clone();
                async {
                    storage
                        .update_refresh_token(
                            &id,
                            Box::new(move |mut r: RefreshToken| {
                                r.obsolete_token = Some(r.token.clone());
                                r.token = fresh_secret.clone();
                                r.last_used = now;
                                r.claims = claims.clone();
                                r.connector_data = connector_data.clone();
                                Ok(r)
                            }),
                        )
                        .await
                }
            },
            crate::util::STORAGE_CONFLICT_RETRIES,
        )
        .await?;
        encode_wire_token(&updated)
    } else {
        storage
            .update_refresh_token(
                &record.id,
                Box::new({
                    let claims = claims.clone();
                    let connector_data = connector_data.clone();
                    move |mut r: RefreshToken| {
                        r.last_used = now;
                        r.claims = claims.clone();
                        r.connector_data = connector_data.clone();
                        Ok(r)
                    }
                }),
            )
            .await?;
        wire_token.to_string()
    };

    let updated_record = storage.get_refresh_token(&record.id).await?;

    storage
        .upsert_offline_session(
            &updated_record.claims.user_id,
            &updated_record.connector_id,
            Box::new({
                let client_id = client_id.to_string();
                let refresh_id = updated_record.id.clone();
                move |mut session: OfflineSession| {
                    session.refresh.insert(client_id.clone(), OfflineRefreshRef { refresh_id: refresh_id.clone() });
                    Ok(session)
                }
            }),
        )
        .await?;

    Ok(RotatedRefresh {
        wire_token: new_wire_token,
        record: updated_record,
    })
}

fn encode_wire_token(record: &RefreshToken) -> String {
    RefreshTokenRef {
        refresh_id: record.id.clone(),
        token: record.token.clone(),
    }
    .encode_b64url()
}

pub fn encode_new_refresh_wire_token(record: &RefreshToken) -> String {
    encode_wire_token(record)
}

/// Deletes the refresh record and its `OfflineSession` pointer (spec.md
/// §4.8 step 3 "REUSE DETECTED", §8 scenario S4).
async fn revoke(storage: &dyn Storage, record: &RefreshToken) -> Result<(), Error> {
    storage.delete_refresh_token(&record.id).await?;
    storage
        .upsert_offline_session(
            &record.claims.user_id,
            &record.connector_id,
            Box::new({
                let client_id = record.client_id.clone();
                move |mut session: OfflineSession| {
                    session.refresh.remove(&client_id);
                    Ok(session)
                }
            }),
        )
        .await?;
    Ok(())
}

/// Creates the initial `RefreshToken` record for a fresh `offline_access`
/// grant (used by the authorization-code and password grants in
/// `flow::token`).
pub async fn create(storage: &dyn Storage, client_id: &str, connector_id: &str, scopes: Vec<String>, claims: crate::model::Claims, connector_data: serde_json::Value) -> Result<(String, RefreshToken), Error> {
    let now = Utc::now();
    let record = RefreshToken {
        id: get_uuid(),
        token: b64url_encode(&get_random_64()),
        obsolete_token: None,
        nonce: None,
        client_id: client_id.to_string(),
        connector_id: connector_id.to_string(),
        scopes,
        claims,
        connector_data,
        created_at: now,
        last_used: now,
    };
    storage.create_refresh_token(record.clone()).await?;

    storage
        .upsert_offline_session(
            &record.claims.user_id,
            connector_id,
            Box::new({
                let client_id = client_id.to_string();
                let refresh_id = record.id.clone();
                move |mut session: OfflineSession| {
                    session.refresh.insert(client_id.clone(), OfflineRefreshRef { refresh_id: refresh_id.clone() });
                    Ok(session)
                }
            }),
        )
        .await?;

    let wire = encode_wire_token(&record);
    Ok((wire, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn config() -> Config {
        Config::load().unwrap()
    }

    #[tokio::test]
    async fn reuse_within_interval_is_tolerated() {
        let storage = MemoryStorage::new();
        let connectors = ConnectorRegistry::new();
        let cfg = config();

        let (wire0, _) = create(&storage, "c1", "local", vec!["openid".into(), "offline_access".into()], Default::default(), serde_json::Value::Null).await.unwrap();

        let rotated = exchange(&storage, &connectors, &cfg, "c1", &wire0, None).await.unwrap();
        let wire1 = rotated.wire_token;
        assert_ne!(wire0, wire1);

        // Re-presenting the prior token within the reuse interval succeeds.
        let rotated_again = exchange(&storage, &connectors, &cfg, "c1", &wire0, None).await.unwrap();
        assert_ne!(rotated_again.wire_token, wire0);
    }

    #[tokio::test]
    async fn reuse_beyond_interval_cascades_revocation() {
        let storage = MemoryStorage::new();
        let connectors = ConnectorRegistry::new();
        let cfg = config();

        let (wire0, record0) = create(&storage, "c1", "local", vec!["openid".into(), "offline_access".into()], Default::default(), serde_json::Value::Null).await.unwrap();
        let _rotated = exchange(&storage, &connectors, &cfg, "c1", &wire0, None).await.unwrap();

        // Force the reuse window to have elapsed.
        storage
            .update_refresh_token(
                &record0.id,
                Box::new(|mut r: RefreshToken| {
                    r.last_used = Utc::now() - chrono::Duration::seconds(3600);
                    Ok(r)
                }),
            )
            .await
            .unwrap();

        let err = exchange(&storage, &connectors, &cfg, "c1", &wire0, None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(storage.get_refresh_token(&record0.id).await.is_err());
    }
}
