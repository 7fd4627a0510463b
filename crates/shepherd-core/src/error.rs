//! The shared error taxonomy.
//!
//! Every fallible operation in the control plane resolves to one of the
//! classes below. Handlers and workers branch on [`ErrorClass`] exactly
//! once — at the HTTP boundary or the queue boundary — rather than
//! re-deriving "is this retryable" logic at each call site.

use snafu::Snafu;

/// The taxonomy classes named in the error handling design: each carries its
/// own propagation policy (surfaced to a caller, retried by the queue, or
/// logged and left for reconciliation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorClass {
    /// Input violates a static rule (naming, forbidden field, missing confirmation).
    Validation,
    /// Missing global capability or resource role.
    Authorization,
    /// Duplicate pending request, name collision, uniqueness violation.
    Conflict,
    /// Environment mismatch, incompatible spec, deletion blocked by children.
    Precondition,
    /// DB, queue, or provider timeouts. Retried by the queue.
    TransientInfra,
    /// Malformed payload, missing ticket, unknown operation. Job cancels itself.
    PermanentInfra,
    /// Cluster side effect succeeded but the following DB write failed.
    /// Never retried (retrying would double the side effect); logged at
    /// critical level and left for out-of-band reconciliation.
    CriticalDiscrepancy,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("validation failed: {message}"))]
    Validation { message: String },

    #[snafu(display("forbidden field supplied by caller: {field}"))]
    ForbiddenField { field: String },

    #[snafu(display("caller lacks capability {capability:?}"))]
    MissingCapability { capability: String },

    #[snafu(display("resource is not visible to the caller"))]
    ResourceNotVisible,

    #[snafu(display("duplicate pending request, existing ticket {existing_ticket_id}"))]
    DuplicatePendingRequest { existing_ticket_id: uuid::Uuid },

    #[snafu(display("name collision: {name}"))]
    NameCollision { name: String },

    #[snafu(display("precondition failed: {message}"))]
    Precondition { message: String },

    #[snafu(display("environment mismatch: cluster={cluster_env} namespace={namespace_env}"))]
    EnvironmentMismatch {
        cluster_env: String,
        namespace_env: String,
    },

    #[snafu(display("deletion blocked: {child_kind} still exist under {parent}"))]
    DeletionBlocked { parent: String, child_kind: String },

    #[snafu(display("transient infrastructure failure: {message}"))]
    TransientInfra { message: String },

    #[snafu(display("permanent infrastructure failure: {message}"))]
    PermanentInfra { message: String },

    #[snafu(display("critical discrepancy: {message}"))]
    CriticalDiscrepancy { message: String },

    #[snafu(display("not found: {what}"))]
    NotFound { what: String },

    #[snafu(display("rate limited; retry after {retry_after_seconds}s"))]
    Throttled { retry_after_seconds: u64 },
}

impl Error {
    /// The taxonomy class this error belongs to, used once at each boundary
    /// to decide propagation policy (HTTP status, retry, or log-only).
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } | Self::ForbiddenField { .. } => ErrorClass::Validation,
            Self::MissingCapability { .. } | Self::ResourceNotVisible => {
                ErrorClass::Authorization
            }
            Self::DuplicatePendingRequest { .. } | Self::NameCollision { .. } => {
                ErrorClass::Conflict
            }
            Self::Precondition { .. }
            | Self::EnvironmentMismatch { .. }
            | Self::DeletionBlocked { .. } => ErrorClass::Precondition,
            Self::TransientInfra { .. } | Self::Throttled { .. } => ErrorClass::TransientInfra,
            Self::PermanentInfra { .. } | Self::NotFound { .. } => ErrorClass::PermanentInfra,
            Self::CriticalDiscrepancy { .. } => ErrorClass::CriticalDiscrepancy,
        }
    }

    /// Whether the async job queue should retry the job that produced this
    /// error. Only transient infrastructure errors are retryable; permanent
    /// errors and critical discrepancies cancel the job instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::TransientInfra)
    }
}
