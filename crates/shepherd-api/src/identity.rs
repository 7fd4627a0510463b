//! A minimal [`IdentityProvider`] adapter (spec §6: "normalized payload
//! `{subject, email, display_name, groups[]}`"). The concrete OIDC/LDAP
//! exchange that produces a session is explicitly out of scope (spec §1);
//! this adapter only bridges the *result* of that exchange into the
//! platform — a bearer credential is itself a signed session token (HS256,
//! `jsonwebtoken`, the same idiom [`crate::vnc_token`] uses for console
//! access) carrying exactly the normalized claims the interface names.

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shepherd_core::provider::{CallerIdentity, IdentityProvider, ProviderError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    email: String,
    display_name: String,
    #[serde(default)]
    groups: Vec<String>,
    exp: i64,
}

/// Verifies a bearer credential as a session token signed with
/// `SESSION_SECRET` (spec §6). Built once in `shepherd-cli` from the
/// resolved secret and handed to [`crate::AppState`] as a trait object.
pub struct SessionIdentityProvider {
    signing_key: Box<[u8]>,
}

impl SessionIdentityProvider {
    pub fn new(signing_key: impl Into<Box<[u8]>>) -> Self {
        Self {
            signing_key: signing_key.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentityProvider {
    async fn resolve(&self, credential: &str) -> Result<CallerIdentity, ProviderError> {
        let decoded = jsonwebtoken::decode::<SessionClaims>(
            credential,
            &DecodingKey::from_secret(&self.signing_key),
            &Validation::default(),
        )
        .map_err(|err| ProviderError::permanent(format!("invalid session token: {err}")))?;

        let claims = decoded.claims;
        Ok(CallerIdentity {
            subject: claims.sub,
            email: claims.email,
            display_name: claims.display_name,
            groups: claims.groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(key: &[u8], subject: &str) -> String {
        let claims = SessionClaims {
            sub: subject.to_string(),
            email: format!("{subject}@example.com"),
            display_name: subject.to_string(),
            groups: vec!["engineers".to_string()],
            exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(key)).expect("encode")
    }

    #[tokio::test]
    async fn resolves_a_validly_signed_session_token() {
        let key = b"test-session-secret".to_vec();
        let provider = SessionIdentityProvider::new(key.clone());
        let identity = provider.resolve(&token(&key, "alice")).await.expect("resolve");
        assert_eq!(identity.subject, "alice");
        assert_eq!(identity.groups, vec!["engineers".to_string()]);
    }

    #[tokio::test]
    async fn rejects_a_token_signed_with_the_wrong_key() {
        let provider = SessionIdentityProvider::new(b"key-a".to_vec());
        assert!(provider.resolve(&token(b"key-b", "alice")).await.is_err());
    }
}
