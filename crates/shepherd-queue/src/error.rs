//! Queue-local error type, mirroring `shepherd_store::error`'s shape: wrap
//! `sqlx::Error`, project store-detected conditions onto the shared
//! taxonomy (spec §7) at the boundary.

use snafu::Snafu;
use uuid::Uuid;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("job {job_id} not found"))]
    NotFound { job_id: Uuid },

    #[snafu(display("job args malformed: {message}"))]
    MalformedArgs { message: String },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Database { source }
    }
}

impl Error {
    pub fn into_domain(self) -> shepherd_core::error::Error {
        use shepherd_core::error as core_error;
        match self {
            Self::Database { source } => core_error::Error::TransientInfra {
                message: source.to_string(),
            },
            Self::NotFound { job_id } => core_error::Error::NotFound {
                what: format!("queue job {job_id}"),
            },
            Self::MalformedArgs { message } => core_error::Error::PermanentInfra { message },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
