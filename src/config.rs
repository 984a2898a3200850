//
// Configuration (SPEC_FULL.md §9 "AMBIENT"): env-var driven settings,
// grouped accessors, in the teacher's `src/config.rs` style (`Lazy<Config>`,
// `RwLock<ConfigItems>`, `dotenvy` env-file loading) but trimmed to the
// settings this crate actually has.
//
use std::process::exit;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::util::get_env_bool;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        println!("Error loading config:\n  {e}\n");
        exit(12)
    })
});

macro_rules! env_or {
    ($key:literal, $ty:ty, $default:expr) => {
        crate::util::get_env::<$ty>($key).unwrap_or_else(|| $default)
    };
}

struct ConfigItems {
    // General
    domain: String,
    skip_approval: bool,

    // Key rotation (C2)
    rotate_after_seconds: i64,
    verification_retention_multiplier: i64,

    // Token lifetimes
    id_token_validity_seconds: i64,
    access_token_validity_seconds: i64,
    auth_code_validity_seconds: i64,

    // Refresh policy (C8)
    refresh_rotate: bool,
    refresh_reuse_interval_seconds: i64,
    refresh_absolute_lifetime_seconds: Option<i64>,
    refresh_valid_if_not_used_for_seconds: Option<i64>,

    // PKCE
    pkce_required_for_public_clients: bool,

    // Device flow (C9)
    device_valid_for_seconds: i64,
    device_poll_interval_seconds: i64,
    device_poll_increment_seconds: i64,

    // Garbage collection
    gc_interval_seconds: u64,
}

impl ConfigItems {
    fn load() -> Self {
        ConfigItems {
            domain: env_or!("DOMAIN", String, "http://localhost:5556".to_string()),
            skip_approval: get_env_bool("SKIP_APPROVAL").unwrap_or(false),

            rotate_after_seconds: env_or!("ROTATE_AFTER_SECONDS", i64, 6 * 3600),
            verification_retention_multiplier: env_or!("VERIFICATION_RETENTION_MULTIPLIER", i64, 2),

            id_token_validity_seconds: env_or!("ID_TOKEN_VALIDITY_SECONDS", i64, 24 * 3600),
            access_token_validity_seconds: env_or!("ACCESS_TOKEN_VALIDITY_SECONDS", i64, 3600),
            auth_code_validity_seconds: env_or!("AUTH_CODE_VALIDITY_SECONDS", i64, 30 * 60),

            refresh_rotate: get_env_bool("REFRESH_ROTATE").unwrap_or(true),
            refresh_reuse_interval_seconds: env_or!("REFRESH_REUSE_INTERVAL_SECONDS", i64, 30),
            refresh_absolute_lifetime_seconds: crate::util::get_env("REFRESH_ABSOLUTE_LIFETIME_SECONDS"),
            refresh_valid_if_not_used_for_seconds: crate::util::get_env("REFRESH_VALID_IF_NOT_USED_FOR_SECONDS"),

            pkce_required_for_public_clients: get_env_bool("PKCE_REQUIRED_FOR_PUBLIC_CLIENTS").unwrap_or(true),

            device_valid_for_seconds: env_or!("DEVICE_VALID_FOR_SECONDS", i64, 300),
            device_poll_interval_seconds: env_or!("DEVICE_POLL_INTERVAL_SECONDS", i64, 5),
            device_poll_increment_seconds: env_or!("DEVICE_POLL_INCREMENT_SECONDS", i64, 5),

            gc_interval_seconds: env_or!("GC_INTERVAL_SECONDS", u64, 5 * 60),
        }
    }
}

pub struct Config {
    inner: RwLock<ConfigItems>,
}

#[allow(dead_code)]
impl Config {
    pub fn load() -> Result<Self, crate::error::Error> {
        let env_file = crate::util::get_env("ENV_FILE").unwrap_or_else(|| String::from(".env"));
        match dotenvy::from_path(&env_file) {
            Ok(_) => println!("[INFO] Using environment file `{env_file}` for configuration.\n"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => println!("[WARNING] Failed to read `{env_file}`: {e}\n"),
        }

        Ok(Self {
            inner: RwLock::new(ConfigItems::load()),
        })
    }

    /// `scheme://host` issuer string (spec.md §6 discovery `issuer`), with
    /// any trailing slash trimmed so path joins (`{issuer}/token`, etc.)
    /// never produce a double slash.
    pub fn issuer(&self) -> String {
        self.inner.read().unwrap().domain.trim_end_matches('/').to_string()
    }

    pub fn domain(&self) -> String {
        self.issuer()
    }

    pub fn skip_approval(&self) -> bool {
        self.inner.read().unwrap().skip_approval
    }

    pub fn rotate_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().rotate_after_seconds)
    }

    /// How long a retired signing key must remain in `verification_keys`
    /// before it is pruned (spec.md §4.2's rotation grace window).
    pub fn verification_retention(&self) -> chrono::Duration {
        let inner = self.inner.read().unwrap();
        chrono::Duration::seconds(inner.rotate_after_seconds * inner.verification_retention_multiplier)
    }

    pub fn id_token_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().id_token_validity_seconds)
    }

    pub fn access_token_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().access_token_validity_seconds)
    }

    pub fn auth_code_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().auth_code_validity_seconds)
    }

    pub fn refresh_rotate(&self) -> bool {
        self.inner.read().unwrap().refresh_rotate
    }

    pub fn refresh_reuse_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().refresh_reuse_interval_seconds)
    }

    pub fn refresh_absolute_lifetime(&self) -> Option<chrono::Duration> {
        self.inner.read().unwrap().refresh_absolute_lifetime_seconds.map(chrono::Duration::seconds)
    }

    pub fn refresh_valid_if_not_used_for(&self) -> Option<chrono::Duration> {
        self.inner.read().unwrap().refresh_valid_if_not_used_for_seconds.map(chrono::Duration::seconds)
    }

    pub fn pkce_required_for_public_clients(&self) -> bool {
        self.inner.read().unwrap().pkce_required_for_public_clients
    }

    pub fn device_valid_for(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.read().unwrap().device_valid_for_seconds)
    }

    pub fn device_poll_interval_seconds(&self) -> i64 {
        self.inner.read().unwrap().device_poll_interval_seconds
    }

    pub fn device_poll_increment_seconds(&self) -> i64 {
        self.inner.read().unwrap().device_poll_increment_seconds
    }

    pub fn gc_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inner.read().unwrap().gc_interval_seconds)
    }
}
