//
// Wire types for the opaque `sub` claim and the refresh-token handle
// (spec.md §6, SPEC_FULL.md §3). Hand-derived `prost::Message` structs with
// no `.proto` compilation step, the same shape used by
// `mozilla-application-services/components/logins`'s generated protobuf
// file in the retrieval pack.
//
use prost::Message;

/// Encodes the stable, opaque `sub` claim: which connector authenticated
/// the user, and that connector's own identifier for them. Never decoded
/// by a relying party; only this provider needs to recover `user_id` and
/// `conn_id` from a presented `sub`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct SubjectId {
    #[prost(string, required, tag = "1")]
    pub conn_id: String,
    #[prost(string, required, tag = "2")]
    pub user_id: String,
}

impl SubjectId {
    pub fn encode_b64url(&self) -> String {
        crate::util::b64url_encode(&self.encode_to_vec())
    }

    pub fn decode_b64url(s: &str) -> Result<Self, crate::error::Error> {
        let bytes = crate::util::b64url_decode(s)?;
        Self::decode(bytes.as_slice()).map_err(|_| crate::error::Error::invalid_grant("malformed sub"))
    }
}

/// Encodes a refresh-token handle: the storage record id plus the
/// high-entropy secret portion, so a presented refresh token can be split
/// into "which record to look up" and "what to compare against it"
/// without another storage round trip on forgery (spec.md §4.8).
#[derive(Clone, PartialEq, Eq, Message)]
pub struct RefreshTokenRef {
    #[prost(string, required, tag = "1")]
    pub refresh_id: String,
    #[prost(string, required, tag = "2")]
    pub token: String,
}

impl RefreshTokenRef {
    pub fn encode_b64url(&self) -> String {
        crate::util::b64url_encode(&self.encode_to_vec())
    }

    pub fn decode_b64url(s: &str) -> Result<Self, crate::error::Error> {
        let bytes = crate::util::b64url_decode(s)?;
        Self::decode(bytes.as_slice()).map_err(|_| crate::error::Error::invalid_grant("malformed refresh token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_id_round_trips_through_b64url() {
        let id = SubjectId {
            conn_id: "local".to_string(),
            user_id: "alice".to_string(),
        };
        let encoded = id.encode_b64url();
        let decoded = SubjectId::decode_b64url(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn refresh_token_ref_round_trips() {
        let r = RefreshTokenRef {
            refresh_id: "r-1".to_string(),
            token: "super-secret".to_string(),
        };
        let encoded = r.encode_b64url();
        let decoded = RefreshTokenRef::decode_b64url(&encoded).unwrap();
        assert_eq!(r, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SubjectId::decode_b64url("not-valid-base64url!!").is_err());
    }
}
