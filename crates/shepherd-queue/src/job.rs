//! Job kinds (spec §9 "polymorphism over operation kinds" — closed tagged
//! variant, workers dispatch on kind) and their per-kind queue policy (spec
//! §4.6: queue name, max attempts, minimum re-insert interval for
//! maintenance kinds).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// The closed set of job kinds. Adding a kind means adding a variant here,
/// its args schema, and its worker — never an open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    VmCreate,
    VmDelete,
    VmPower,
    NotificationCleanup,
    VmTombstoneSweep,
}

pub const QUEUE_VM_OPERATIONS: &str = "vm_operations";
pub const QUEUE_MAINTENANCE: &str = "maintenance";

impl JobKind {
    /// Queue name each kind is dispatched on.
    pub fn queue_name(self) -> &'static str {
        match self {
            Self::VmCreate | Self::VmDelete | Self::VmPower => QUEUE_VM_OPERATIONS,
            Self::NotificationCleanup | Self::VmTombstoneSweep => QUEUE_MAINTENANCE,
        }
    }

    /// Spec §4.6: "3 for business operations, 1 for maintenance".
    pub fn max_attempts(self) -> i32 {
        match self {
            Self::VmCreate | Self::VmDelete | Self::VmPower => 3,
            Self::NotificationCleanup | Self::VmTombstoneSweep => 1,
        }
    }

    /// Minimum re-insert interval for periodic maintenance kinds, used by
    /// the scheduler that re-enqueues them (spec §4.6). Business operation
    /// kinds are not periodic and so have none.
    pub fn min_reinsert_interval(self) -> Option<chrono::Duration> {
        match self {
            Self::NotificationCleanup | Self::VmTombstoneSweep => Some(chrono::Duration::hours(24)),
            Self::VmCreate | Self::VmDelete | Self::VmPower => None,
        }
    }
}

/// The args carried by a job — an opaque event id plus an optional
/// discriminator (spec §9 claim-check: "never the business payload").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobArgs {
    pub event_id: Uuid,
    /// e.g. the power operation (`start`/`stop`/`restart`) for `VmPower`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
}

impl JobArgs {
    pub fn for_event(event_id: Uuid) -> Self {
        Self {
            event_id,
            discriminator: None,
        }
    }

    pub fn with_discriminator(event_id: Uuid, discriminator: impl Into<String>) -> Self {
        Self {
            event_id,
            discriminator: Some(discriminator.into()),
        }
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

/// Lifecycle states a persisted job row moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub args: Json,
    pub queue_name: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub state: JobState,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub last_error: Option<String>,
}

impl QueueJob {
    /// Parses `args` into the typed [`JobArgs`]; a malformed payload is a
    /// permanent failure, not a retryable one (spec §4.6).
    pub fn parse_args(&self) -> Result<JobArgs, serde_json::Error> {
        serde_json::from_value(self.args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_kinds_get_three_attempts_and_no_reinsert_interval() {
        assert_eq!(JobKind::VmCreate.max_attempts(), 3);
        assert_eq!(JobKind::VmPower.queue_name(), QUEUE_VM_OPERATIONS);
        assert!(JobKind::VmDelete.min_reinsert_interval().is_none());
    }

    #[test]
    fn maintenance_kinds_get_one_attempt_and_a_reinsert_interval() {
        assert_eq!(JobKind::NotificationCleanup.max_attempts(), 1);
        assert_eq!(JobKind::VmTombstoneSweep.queue_name(), QUEUE_MAINTENANCE);
        assert!(JobKind::NotificationCleanup.min_reinsert_interval().is_some());
    }

    #[test]
    fn job_args_round_trip_through_json() {
        let event_id = Uuid::new_v4();
        let args = JobArgs::with_discriminator(event_id, "start");
        let json = args.to_json();
        let decoded: JobArgs = serde_json::from_value(json).expect("decode");
        assert_eq!(decoded, args);
    }
}
