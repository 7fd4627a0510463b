//! The worker pool: the KubeVirt cluster provider, the per-kind dispatch
//! protocol and the pool runtime that claims and settles queue jobs (spec
//! §4.7, §5, §6).

pub mod cancellation;
pub mod dispatch;
pub mod error;
pub mod kubevirt;
pub mod runtime;

pub use cancellation::TokioCancellation;
pub use error::WorkerError;
pub use kubevirt::{ClusterClients, KubeVirtProvider, StaticClusterClients};
pub use runtime::{run, PoolConfig};
