//! Authentication middleware (spec §6): resolves the bearer credential on
//! every request to a normalized [`CallerIdentity`] via the state's
//! [`IdentityProvider`] adapter and inserts it as a request extension, the
//! way a tracing layer inserts a request span before handlers run. The
//! concrete OIDC/LDAP resolution behind the adapter is out of scope
//! (spec §1); this module only wires the seam.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use shepherd_core::provider::CallerIdentity;

use crate::error::{ApiError, UnauthenticatedSnafu};
use crate::state::AppState;

/// Extracts and resolves `Authorization: Bearer <credential>`, inserting the
/// resolved identity as a request extension for downstream handlers.
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| UnauthenticatedSnafu.build())?;

    let credential = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| UnauthenticatedSnafu.build())?;

    let identity = state
        .identity_provider
        .resolve(credential)
        .await
        .map_err(|err| ApiError::IdentityResolution { message: err.message })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Extractor pulling the [`CallerIdentity`] inserted by [`resolve_identity`]
/// out of request extensions, so handlers can take `Identity` as a plain
/// argument instead of reaching into extensions themselves.
pub struct Identity(pub CallerIdentity);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .map(Identity)
            .ok_or_else(|| UnauthenticatedSnafu.build())
    }
}
