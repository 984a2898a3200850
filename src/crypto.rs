use crate::error::Error;
use ring::hmac;

//
// HMAC
//

/// HMAC-SHA256 over raw bytes, base64url(no-pad)-encoded. Used to bind the
/// approval request id to the in-flight `AuthRequest` (spec.md §4.6): the
/// handle carries its own HMAC so a tampered or replayed id is rejected
/// without a storage round trip.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

pub fn hmac_sha256_verify(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, data, signature).is_ok()
}

//
// Random values
//

pub fn get_random_64() -> Vec<u8> {
    get_random(vec![0u8; 64])
}

pub fn get_random(mut array: Vec<u8>) -> Vec<u8> {
    use ring::rand::{SecureRandom, SystemRandom};

    SystemRandom::new().fill(&mut array).expect("error generating random values");

    array
}

pub fn generate_token(token_size: u32) -> Result<String, Error> {
    if token_size > 19 {
        return Err(Error::internal("token size must be at most 19 digits"));
    }

    // 8 bytes to create an u64 for up to 19 token digits
    let bytes = get_random(vec![0; 8]);
    let mut bytes_array = [0u8; 8];
    bytes_array.copy_from_slice(&bytes);

    let number = u64::from_be_bytes(bytes_array) % 10u64.pow(token_size);
    let token = format!("{number:0size$}", size = token_size as usize);
    Ok(token)
}

//
// Constant time compare
//
pub fn ct_eq<T: AsRef<[u8]>, U: AsRef<[u8]>>(a: T, b: U) -> bool {
    use ring::constant_time::verify_slices_are_equal;

    verify_slices_are_equal(a.as_ref(), b.as_ref()).is_ok()
}

//
// RSA signing-key generation (C2)
//
// The teacher only ever signs with pre-provisioned PEM files; this crate
// *is* the provider and must mint its own signing keys at rotation time.
//
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

pub const RSA_KEY_BITS: usize = 2048;

pub struct GeneratedKeyPair {
    pub private_key_pem: String,
    pub public_key_der: Vec<u8>,
    /// `kid`: base64url(no-pad) SHA-256 of the DER-encoded public key, the
    /// common JWKS convention (spec.md §3 "Keys").
    pub kid: String,
}

pub fn generate_rsa_keypair() -> Result<GeneratedKeyPair, Error> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|e| Error::internal(format!("rsa keygen failed: {e}")))?;

    let private_key_pem = private_key
        .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| Error::internal(format!("rsa pkcs1 encode failed: {e}")))?
        .to_string();

    let public_key = private_key.to_public_key();
    let public_key_der = public_key.to_public_key_der().map_err(|e| Error::internal(format!("rsa der encode failed: {e}")))?.into_vec();

    let kid = crate::util::b64url_encode(&Sha256::digest(&public_key_der));

    Ok(GeneratedKeyPair {
        private_key_pem,
        public_key_der,
        kid,
    })
}
