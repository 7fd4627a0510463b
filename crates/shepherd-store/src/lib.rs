//! The transactional Postgres store backing the Shepherd control plane
//! (spec §4.3, §4.4): tickets, the domain event log, resource rows, RBAC
//! bindings, audit and notifications.
//!
//! Every module here takes `&mut sqlx::PgConnection` rather than a concrete
//! transaction wrapper: a `sqlx::Transaction` dereferences to a
//! `PgConnection`, so callers open one transaction per request/approval/batch
//! submission with [`pool::connect`]'s returned pool, pass `&mut *tx` through
//! RBAC check, naming validation and every write named in a single call to
//! [`submit::submit`] or [`decide::approve_create`], and commit once. No
//! function in this crate opens a nested transaction — spec §4.3 forbids
//! mixing transaction contexts, and a generic-executor signature makes doing
//! so a type error rather than a runtime discipline.
//!
//! `shepherd-queue`'s job-insert functions accept the same
//! `&mut PgConnection` type, so a caller can insert a queue job in the same
//! transaction as the ticket/event write that produced it (invariant 3)
//! without this crate depending on `shepherd-queue` or vice versa.

pub mod audit;
pub mod batch;
pub mod catalog;
pub mod decide;
pub mod error;
pub mod events;
pub mod notifications;
pub mod pool;
pub mod rbac_store;
pub mod secrets;
pub mod services;
pub mod submit;
pub mod systems;
pub mod tickets;
pub mod vms;
pub mod vnc;

pub use pool::connect;
pub use sqlx::postgres::PgPool;
