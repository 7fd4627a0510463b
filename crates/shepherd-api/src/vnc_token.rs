//! VNC access token issuance and verification (spec §4.10, SPEC_FULL.md's
//! ambient addition): a signed JWT (`jsonwebtoken`, HS256) carrying `sub`,
//! `vm_id`, `cluster_id`, `namespace`, `exp` and a unique `jti`. First-use is
//! enforced by the caller recording `jti` in [`shepherd_store::vnc`] — this
//! module only mints and verifies the signature/expiry/shape.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncClaims {
    pub sub: String,
    pub vm_id: Uuid,
    pub cluster_id: Uuid,
    pub namespace: String,
    pub exp: i64,
    pub jti: Uuid,
}

pub fn mint(
    signing_key: &[u8],
    ttl: Duration,
    subject: &str,
    vm_id: Uuid,
    cluster_id: Uuid,
    namespace: &str,
) -> Result<(String, VncClaims), ApiError> {
    let claims = VncClaims {
        sub: subject.to_string(),
        vm_id,
        cluster_id,
        namespace: namespace.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
        jti: Uuid::new_v4(),
    };
    let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(signing_key))
        .map_err(|err| ApiError::InvalidVncToken { message: err.to_string() })?;
    Ok((token, claims))
}

/// Verifies signature and expiry; first-use is the caller's job
/// ([`shepherd_store::vnc::try_consume`]).
pub fn verify(signing_key: &[u8], token: &str) -> Result<VncClaims, ApiError> {
    let decoded = jsonwebtoken::decode::<VncClaims>(
        token,
        &DecodingKey::from_secret(signing_key),
        &Validation::default(),
    )
    .map_err(|err| ApiError::InvalidVncToken { message: err.to_string() })?;
    Ok(decoded.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_verifies_and_carries_the_same_claims() {
        let key = b"test-signing-key";
        let vm_id = Uuid::new_v4();
        let cluster_id = Uuid::new_v4();
        let (token, minted) = mint(key, Duration::hours(2), "alice", vm_id, cluster_id, "prod-shop").expect("mint");
        let verified = verify(key, &token).expect("verify");
        assert_eq!(verified.sub, "alice");
        assert_eq!(verified.vm_id, vm_id);
        assert_eq!(verified.jti, minted.jti);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (token, _) = mint(b"key-a", Duration::hours(2), "alice", Uuid::new_v4(), Uuid::new_v4(), "ns").expect("mint");
        assert!(verify(b"key-b", &token).is_err());
    }

    #[test]
    fn expired_token_fails_verification() {
        let (token, _) = mint(b"key-a", Duration::seconds(-10), "alice", Uuid::new_v4(), Uuid::new_v4(), "ns").expect("mint");
        assert!(verify(b"key-a", &token).is_err());
    }
}
