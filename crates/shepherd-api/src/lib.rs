//! The HTTP API surface (spec §6): axum handlers over the shared
//! `shepherd-store`/`shepherd-queue` transaction bodies.

pub mod auth;
pub mod error;
pub mod identity;
pub mod options;
pub mod pagination;
pub mod routes;
pub mod server;
pub mod state;
pub mod vnc_token;

pub use error::ApiError;
pub use identity::SessionIdentityProvider;
pub use options::{ApiOptions, ApiOptionsBuilder};
pub use server::{ApiServer, ServerError};
pub use state::AppState;
pub use routes::build_router;
