//! Store-local error type. Wraps `sqlx::Error` and maps it, plus a handful of
//! store-detected conditions (duplicate pending ticket, deletion blocked by
//! live children), onto `shepherd_core::error::Error` so that every caller
//! above this crate branches on the one shared taxonomy (spec §7).

use snafu::Snafu;
use uuid::Uuid;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("migration error: {source}"))]
    Migration { source: sqlx::migrate::MigrateError },

    #[snafu(display("not found: {what}"))]
    NotFound { what: String },

    #[snafu(display("duplicate pending request, existing ticket {existing_ticket_id}"))]
    DuplicatePendingRequest { existing_ticket_id: Uuid },

    #[snafu(display("name collision: {name}"))]
    NameCollision { name: String },

    #[snafu(display("deletion blocked: {child_kind} still exist under {parent}"))]
    DeletionBlocked { parent: String, child_kind: String },

    #[snafu(display("ticket {ticket_id} is not in the expected state for this transition"))]
    InvalidTransition { ticket_id: Uuid },

    #[snafu(display("column {column} holds an unrecognized value {value:?}: {message}"))]
    Decode {
        column: &'static str,
        value: String,
        message: String,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        match &source {
            sqlx::Error::RowNotFound => Self::NotFound {
                what: "row".to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::NameCollision {
                name: db_err.message().to_string(),
            },
            _ => Self::Database { source },
        }
    }
}

impl Error {
    /// Projects this store-local error onto the shared taxonomy (spec §7),
    /// so API handlers and workers only ever branch on one `ErrorClass`.
    pub fn into_domain(self) -> shepherd_core::error::Error {
        use shepherd_core::error as core_error;
        match self {
            Self::Database { source } => core_error::Error::TransientInfra {
                message: source.to_string(),
            },
            Self::Migration { source } => core_error::Error::PermanentInfra {
                message: source.to_string(),
            },
            Self::NotFound { what } => core_error::Error::NotFound { what },
            Self::DuplicatePendingRequest { existing_ticket_id } => {
                core_error::Error::DuplicatePendingRequest { existing_ticket_id }
            }
            Self::NameCollision { name } => core_error::Error::NameCollision { name },
            Self::DeletionBlocked { parent, child_kind } => {
                core_error::Error::DeletionBlocked { parent, child_kind }
            }
            Self::InvalidTransition { ticket_id } => core_error::Error::Precondition {
                message: format!("ticket {ticket_id} is not in the expected state"),
            },
            Self::Decode { column, value, message } => core_error::Error::PermanentInfra {
                message: format!("column {column} holds {value:?}: {message}"),
            },
        }
    }
}

/// Decodes a stored `TEXT` column into a closed Rust enum via `FromStr`
/// (every status/kind enum in `shepherd-core` derives `strum::EnumString`).
/// Corrupted data is a permanent-infra condition, never a panic.
pub fn decode_enum<T>(column: &'static str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| Error::Decode {
        column,
        value: raw.to_string(),
        message: err.to_string(),
    })
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
