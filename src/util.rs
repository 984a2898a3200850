use std::time::Duration;

pub fn get_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

//
// Base64url (no padding) helpers, used for the `sub` claim, refresh-token
// handles, and the HMAC-bound approval request id.
//
pub fn b64url_encode(data: &[u8]) -> String {
    data_encoding::BASE64URL_NOPAD.encode(data)
}

pub fn b64url_decode(data: &str) -> Result<Vec<u8>, crate::error::Error> {
    data_encoding::BASE64URL_NOPAD.decode(data.as_bytes()).map_err(|_| crate::error::Error::invalid_request("malformed base64url value"))
}

//
// String util methods
//

use std::str::FromStr;

pub fn try_parse_string<S, T>(string: Option<S>) -> Option<T>
where
    S: AsRef<str>,
    T: FromStr,
{
    if let Some(Ok(value)) = string.map(|s| s.as_ref().parse::<T>()) {
        Some(value)
    } else {
        None
    }
}

//
// Env methods
//

use std::env;

pub fn get_env_str_value(key: &str) -> Option<String> {
    let key_file = format!("{key}_FILE");
    let value_from_env = env::var(key);
    let value_file = env::var(&key_file);

    match (value_from_env, value_file) {
        (Ok(_), Ok(_)) => panic!("You should not define both {key} and {key_file}!"),
        (Ok(v_env), Err(_)) => Some(v_env),
        (Err(_), Ok(v_file)) => match std::fs::read_to_string(v_file) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => panic!("Failed to load {key}: {e:?}"),
        },
        _ => None,
    }
}

pub fn get_env<V>(key: &str) -> Option<V>
where
    V: FromStr,
{
    try_parse_string(get_env_str_value(key))
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    const TRUE_VALUES: &[&str] = &["true", "t", "yes", "y", "1"];
    const FALSE_VALUES: &[&str] = &["false", "f", "no", "n", "0"];

    match get_env_str_value(key) {
        Some(val) if TRUE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(true),
        Some(val) if FALSE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(false),
        _ => None,
    }
}

//
// Retry methods
//

/// Bound used when retrying a storage-updater conflict (spec.md §7:
/// "Storage conflicts ... retry up to a small bounded number of times").
pub const STORAGE_CONFLICT_RETRIES: u32 = 3;

/// Retries a fallible operation up to `max_tries` times with a fixed backoff.
/// Used to bound retries on storage-updater conflicts (spec.md §7: "Storage
/// conflicts ... retry up to a small bounded number of times").
pub async fn retry_async<F, Fut, T, E>(mut func: F, max_tries: u32) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut tries = 0;

    loop {
        match func().await {
            ok @ Ok(_) => return ok,
            Err(e) => {
                tries += 1;

                if tries >= max_tries {
                    return Err(e);
                }

                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}
