//! The async job queue (spec §4.6): job kinds, retry/backoff policy,
//! uniqueness keys, and a Postgres-backed implementation that shares
//! `shepherd-store`'s `&mut PgConnection` convention so that a queue insert
//! commits atomically with the domain writes that produced it.

pub mod backoff;
pub mod error;
pub mod job;
pub mod queue;

pub use job::{JobArgs, JobKind, JobState, QueueJob};
pub use queue::{cancel, claim_next, complete, fail_retryable, insert, insert_periodic};
