//! Domain types, naming validation, the RBAC evaluator and the spec
//! composition algorithm shared by every other Shepherd crate.
//!
//! This crate does no I/O: it is the pure "leaf" layer the rest of the
//! workspace builds on. [`shepherd_store`][store] and
//! [`shepherd_worker`][worker] build on top of it.
//!
//! [store]: https://docs.rs/shepherd-store
//! [worker]: https://docs.rs/shepherd-worker

pub mod domain;
pub mod error;
pub mod naming;
pub mod payloads;
pub mod provider;
pub mod rbac;
pub mod spec_compose;
pub mod throttle;
