//
// Key rotator & cacher (spec.md §4.2, C2). Generates and rotates RSA
// signing keys through the storage updater pattern, and serves them to the
// rest of the process through a lock-free atomic-pointer-swap cache
// (spec.md §5: "the key cache uses an atomic pointer swap, allowing
// concurrent readers with no locking"). The read-through-cache *shape* is
// grounded on the teacher's `Lazy<Cache<...>>` statics in `src/sso.rs`;
// the swap mechanism itself uses `arc-swap` rather than `moka`, since a
// TTL cache doesn't model "hold the value until I say otherwise, then
// atomically replace it" as directly.
//
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey};

use crate::config::Config;
use crate::crypto;
use crate::error::Error;
use crate::model::{Keys, VerificationKey};
use crate::storage::Storage;

/// Keys plus their parsed `jsonwebtoken` material, so signing/verification
/// never re-parses PEM/DER on every request.
pub struct ActiveKeys {
    pub keys: Keys,
    pub encoding_key: EncodingKey,
    pub verification_decoding_keys: Vec<(String, DecodingKey)>,
}

/// One entry of the JWKS response (spec.md §6 `/keys`): the RSA public key
/// decomposed into its modulus/exponent, base64url(no-pad)-encoded per
/// RFC 7518 §6.3.1.
fn rsa_jwk(kid: &str, public_der: &[u8]) -> Result<serde_json::Value, Error> {
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;

    let public_key = rsa::RsaPublicKey::from_public_key_der(public_der).map_err(|e| Error::internal(format!("bad stored public key der: {e}")))?;

    Ok(serde_json::json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": kid,
        "n": crate::util::b64url_encode(&public_key.n().to_bytes_be()),
        "e": crate::util::b64url_encode(&public_key.e().to_bytes_be()),
    }))
}

impl ActiveKeys {
    fn build(keys: Keys) -> Result<Self, Error> {
        let encoding_key = EncodingKey::from_rsa_pem(keys.signing_key_pem.as_bytes()).map_err(|e| Error::internal(format!("bad signing key pem: {e}")))?;

        let mut verification_decoding_keys = Vec::with_capacity(keys.verification_keys.len() + 1);
        verification_decoding_keys.push((keys.signing_kid.clone(), DecodingKey::from_rsa_der(&keys.signing_key_pub_der)));
        for vk in &keys.verification_keys {
            verification_decoding_keys.push((vk.kid.clone(), DecodingKey::from_rsa_der(&vk.public_der)));
        }

        Ok(Self {
            keys,
            encoding_key,
            verification_decoding_keys,
        })
    }

    pub fn decoding_key_for(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification_decoding_keys.iter().find(|(k, _)| k == kid).map(|(_, k)| k)
    }

    /// JWKS body (spec.md §4.2 "JWKS responses return the active signing
    /// public key first, then the retained verification keys").
    pub fn jwks_json(&self) -> Result<serde_json::Value, Error> {
        let mut jwks = Vec::with_capacity(self.keys.verification_keys.len() + 1);
        jwks.push(rsa_jwk(&self.keys.signing_kid, &self.keys.signing_key_pub_der)?);
        for vk in &self.keys.verification_keys {
            jwks.push(rsa_jwk(&vk.kid, &vk.public_der)?);
        }
        Ok(serde_json::json!({ "keys": jwks }))
    }

    /// Seconds until this cache entry goes stale, floored at 120 (spec.md
    /// §6 "`max-age`... minimum 120 s").
    pub fn max_age_seconds(&self) -> i64 {
        (self.keys.next_rotation - Utc::now()).num_seconds().max(120)
    }
}

pub struct KeyCache {
    current: ArcSwap<ActiveKeys>,
}

impl KeyCache {
    /// Loads (or lazily rotates) the initial value from storage so the
    /// cache never starts empty.
    pub async fn load(storage: &dyn Storage, config: &Config) -> Result<Self, Error> {
        let keys = rotate_if_needed(storage, config).await?;
        Ok(Self {
            current: ArcSwap::new(Arc::new(ActiveKeys::build(keys)?)),
        })
    }

    pub fn current(&self) -> Arc<ActiveKeys> {
        self.current.load_full()
    }

    fn store(&self, active: ActiveKeys) {
        self.current.store(Arc::new(active));
    }

    /// Re-reads from storage only when the cached value is stale
    /// (`now >= next_rotation`); otherwise returns the cached value
    /// untouched (spec.md §4.2 "returns it until now >= NextRotation").
    pub async fn refresh_if_stale(&self, storage: &dyn Storage, config: &Config) -> Result<(), Error> {
        if Utc::now() >= self.current().keys.next_rotation {
            let keys = rotate_if_needed(storage, config).await?;
            self.store(ActiveKeys::build(keys)?);
        }
        Ok(())
    }
}

/// The rotation strategy applied through `Storage::update_keys` (spec.md
/// §4.2): generate fresh key material when due, demote the current signing
/// key into `verification_keys`, prune anything past the retention window,
/// and set the next rotation deadline.
async fn rotate_if_needed(storage: &dyn Storage, config: &Config) -> Result<Keys, Error> {
    let rotate_after = config.rotate_after();
    let retention = config.verification_retention();

    storage
        .update_keys(Box::new(move |mut keys: Keys| {
            let now = Utc::now();
            if now < keys.next_rotation && !keys.signing_key_pem.is_empty() {
                return Ok(keys);
            }

            if !keys.signing_key_pem.is_empty() {
                keys.verification_keys.push(VerificationKey {
                    kid: keys.signing_kid.clone(),
                    public_der: keys.signing_key_pub_der.clone(),
                    retired_at: now,
                });
            }

            keys.verification_keys.retain(|vk| now - vk.retired_at < retention);

            let generated = crypto::generate_rsa_keypair()?;
            keys.signing_key_pem = generated.private_key_pem;
            keys.signing_key_pub_der = generated.public_key_der;
            keys.signing_kid = generated.kid;
            keys.next_rotation = now + rotate_after;

            Ok(keys)
        }))
        .await
}

/// Spawns the permanent background rotation loop (spec.md §5: "a
/// key-rotation loop driven by a timer").
pub fn spawn_rotation_loop(storage: Arc<dyn Storage>, cache: Arc<KeyCache>, config: &'static Config) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = cache.refresh_if_stale(storage.as_ref(), config).await {
                log::error!("key rotation tick failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn first_rotation_generates_a_signing_key() {
        let storage = MemoryStorage::new();
        let keys = rotate_if_needed(&storage, &crate::config::Config::load().unwrap()).await.unwrap();
        assert!(!keys.signing_key_pem.is_empty());
        assert!(keys.verification_keys.is_empty());
    }

    #[tokio::test]
    async fn rotation_demotes_previous_signing_key() {
        let storage = MemoryStorage::new();
        let config = crate::config::Config::load().unwrap();
        let first = rotate_if_needed(&storage, &config).await.unwrap();
        let first_kid = first.signing_kid.clone();

        storage
            .update_keys(Box::new(|mut k: Keys| {
                k.next_rotation = Utc::now() - chrono::Duration::seconds(1);
                Ok(k)
            }))
            .await
            .unwrap();

        let second = rotate_if_needed(&storage, &config).await.unwrap();
        assert_ne!(second.signing_kid, first_kid);
        assert!(second.verification_keys.iter().any(|vk| vk.kid == first_kid));
    }
}
