//! Shared handler state (spec §6): the pool every handler opens its own
//! transaction against, the identity-provider adapter the auth middleware
//! calls, and the VNC signing key (SPEC_FULL.md §4.10).

use std::sync::Arc;

use shepherd_core::provider::IdentityProvider;
use shepherd_core::throttle::BatchThrottleConfig;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub identity_provider: Arc<dyn IdentityProvider>,
    /// HS256 signing key for VNC access tokens, sourced the way
    /// `SESSION_SECRET`/`ENCRYPTION_KEY` are in spec §6: environment or
    /// auto-generated-and-persisted, never the config file.
    pub vnc_signing_key: Arc<[u8]>,
    pub vnc_token_ttl: chrono::Duration,
    /// Spec §4.8 two-layer batch throttle thresholds.
    pub batch_throttle: BatchThrottleConfig,
}
