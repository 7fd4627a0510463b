//! Worker-local error type, projecting store/queue/provider failures onto
//! the typed `transient|permanent|critical_discrepancy` taxonomy named in
//! spec §9 ("Runtime exceptions from provider calls ... expressed as typed
//! failures with explicit policy per §7").

use snafu::Snafu;

use shepherd_core::provider::{ProviderError, ProviderErrorKind};

#[derive(Debug, Snafu)]
pub enum WorkerError {
    #[snafu(display("transient: {message}"))]
    Transient { message: String },

    #[snafu(display("permanent: {message}"))]
    Permanent { message: String },

    #[snafu(display("critical discrepancy: {message}"))]
    CriticalDiscrepancy { message: String },
}

impl WorkerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into() }
    }

    /// Whether the async job queue should retry the job that produced this
    /// error (spec §7: only `TransientInfra` is retried).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<shepherd_store::error::Error> for WorkerError {
    fn from(err: shepherd_store::error::Error) -> Self {
        let message = err.to_string();
        match err.into_domain().class() {
            shepherd_core::error::ErrorClass::TransientInfra => Self::transient(message),
            _ => Self::permanent(message),
        }
    }
}

impl From<ProviderError> for WorkerError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::Transient => Self::transient(err.message),
            ProviderErrorKind::Permanent => Self::permanent(err.message),
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("malformed JSON payload: {err}"))
    }
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
