//! The worker pool runtime (spec §4.6/§5): a small set of tokio tasks, one
//! per queue, each looping claim → dispatch → settle against
//! `shepherd-queue` instead of a Kubernetes watch stream.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use shepherd_core::provider::ClusterProvider;
use shepherd_queue::job::{JobKind, QueueJob, QUEUE_MAINTENANCE, QUEUE_VM_OPERATIONS};
use shepherd_store::PgPool;
use tokio_util::sync::CancellationToken;

use crate::cancellation::TokioCancellation;
use crate::dispatch;
use crate::error::WorkerError;

/// Runtime-tunable knobs for the pool, set from `shepherd-cli`'s config
/// layer (SPEC_FULL.md's worker pool size setting).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub vm_operations_concurrency: usize,
    pub poll_interval: StdDuration,
    pub tombstone_retention: chrono::Duration,
    pub notification_retention: chrono::Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            vm_operations_concurrency: 4,
            poll_interval: StdDuration::from_secs(2),
            tombstone_retention: chrono::Duration::days(30),
            notification_retention: chrono::Duration::days(90),
        }
    }
}

/// Runs the pool until `shutdown` is cancelled, polling the `vm_operations`
/// and `maintenance` queues on separate tasks so a slow business operation
/// never starves periodic maintenance (and vice versa).
pub async fn run(
    pool: PgPool,
    provider: Arc<dyn ClusterProvider>,
    config: PoolConfig,
    shutdown: CancellationToken,
) {
    let vm_ops = tokio::spawn(poll_loop(
        pool.clone(),
        provider,
        QUEUE_VM_OPERATIONS,
        config.clone(),
        shutdown.clone(),
    ));
    let maintenance = tokio::spawn(poll_loop(
        pool,
        Arc::new(NoopProvider) as Arc<dyn ClusterProvider>,
        QUEUE_MAINTENANCE,
        config,
        shutdown,
    ));

    let _ = tokio::join!(vm_ops, maintenance);
}

async fn poll_loop(
    pool: PgPool,
    provider: Arc<dyn ClusterProvider>,
    queue_name: &'static str,
    config: PoolConfig,
    shutdown: CancellationToken,
) {
    let limit = if queue_name == QUEUE_VM_OPERATIONS {
        config.vm_operations_concurrency as i64
    } else {
        1
    };

    while !shutdown.is_cancelled() {
        if queue_name == QUEUE_MAINTENANCE {
            schedule_periodic_maintenance(&pool).await;
        }

        let claimed = {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(queue_name, error = %err, "failed to acquire a connection to claim jobs");
                    tokio::time::sleep(config.poll_interval).await;
                    continue;
                }
            };
            shepherd_queue::claim_next(&mut conn, queue_name, limit).await
        };

        let jobs = match claimed {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(queue_name, error = %err, "failed to claim jobs");
                tokio::time::sleep(config.poll_interval).await;
                continue;
            }
        };

        if jobs.is_empty() {
            tokio::time::sleep(config.poll_interval).await;
            continue;
        }

        for job in jobs {
            run_one(&pool, provider.as_ref(), &job, &config).await;
        }
    }
}

/// Re-inserts the two periodic maintenance kinds each time the maintenance
/// queue wakes up; `insert_periodic` is a cheap no-op unless each kind's
/// `min_reinsert_interval` has actually elapsed, so polling this every tick
/// is safe (spec §4.6, §4.9's cleanup-job uniqueness requirement).
async fn schedule_periodic_maintenance(pool: &PgPool) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!(error = %err, "failed to acquire a connection to schedule maintenance jobs");
            return;
        }
    };

    for kind in [JobKind::NotificationCleanup, JobKind::VmTombstoneSweep] {
        if let Err(err) = shepherd_queue::insert_periodic(&mut conn, kind).await {
            tracing::warn!(?kind, error = %err, "failed to schedule periodic maintenance job");
        }
    }
}

/// Runs a single claimed job to completion and settles it — `complete`,
/// `fail_retryable` or `cancel` — against the queue. The dispatch handlers
/// themselves have already written any terminal ticket/event/resource state
/// by the time this function sees their result; this only updates the
/// queue row.
async fn run_one(pool: &PgPool, provider: &dyn ClusterProvider, job: &QueueJob, config: &PoolConfig) {
    let args = match job.parse_args() {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(job_id = %job.id, error = %err, "job args did not parse, cancelling");
            settle(pool, job, Err(WorkerError::permanent(err.to_string()))).await;
            return;
        }
    };

    let cancel = TokioCancellation(CancellationToken::new());

    let outcome = match job.kind {
        JobKind::VmCreate => dispatch::handle_create(pool, provider, &cancel, &args).await,
        JobKind::VmDelete => dispatch::handle_delete(pool, provider, &cancel, &args).await,
        JobKind::VmPower => dispatch::handle_power(pool, provider, &cancel, &args).await,
        JobKind::NotificationCleanup => run_notification_cleanup(pool, config).await,
        JobKind::VmTombstoneSweep => run_tombstone_sweep(pool, config).await,
    };

    settle(pool, job, outcome).await;
}

async fn settle(pool: &PgPool, job: &QueueJob, outcome: Result<(), WorkerError>) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(job_id = %job.id, error = %err, "failed to acquire a connection to settle the job");
            return;
        }
    };

    let settle_result = match outcome {
        Ok(()) => shepherd_queue::complete(&mut conn, job.id).await,
        Err(err) if err.is_retryable() => shepherd_queue::fail_retryable(&mut conn, job, &err.to_string()).await,
        Err(err) => shepherd_queue::cancel(&mut conn, job.id, &err.to_string()).await,
    };

    if let Err(err) = settle_result {
        tracing::error!(job_id = %job.id, error = %err, "failed to persist job settlement");
    }
}

async fn run_notification_cleanup(pool: &PgPool, config: &PoolConfig) -> Result<(), WorkerError> {
    let mut conn = pool.acquire().await.map_err(|err| WorkerError::transient(err.to_string()))?;
    let deleted = shepherd_store::notifications::cleanup_older_than(&mut conn, config.notification_retention).await?;
    tracing::info!(deleted, "swept expired notifications");
    Ok(())
}

async fn run_tombstone_sweep(pool: &PgPool, config: &PoolConfig) -> Result<(), WorkerError> {
    let mut conn = pool.acquire().await.map_err(|err| WorkerError::transient(err.to_string()))?;
    let deleted = shepherd_store::vms::sweep_tombstones(&mut conn, config.tombstone_retention).await?;
    tracing::info!(deleted, "swept deleted vm tombstones");
    Ok(())
}

/// A provider that is never called — the maintenance queue's job kinds
/// never dispatch to a `ClusterProvider` method, but [`poll_loop`] takes one
/// uniformly so both queues share the same loop body.
struct NoopProvider;

#[async_trait::async_trait]
impl ClusterProvider for NoopProvider {
    async fn create_vm(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _name: &str,
        _spec: &shepherd_core::spec_compose::EffectiveSpec,
        _event_id: uuid::Uuid,
    ) -> Result<shepherd_core::provider::ObservedVm, shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches create_vm")
    }

    async fn delete_vm(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _name: &str,
    ) -> Result<(), shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches delete_vm")
    }

    async fn start_vm(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _name: &str,
    ) -> Result<(), shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches start_vm")
    }

    async fn stop_vm(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _name: &str,
    ) -> Result<(), shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches stop_vm")
    }

    async fn restart_vm(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _name: &str,
    ) -> Result<(), shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches restart_vm")
    }

    async fn list_vms(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
        _namespace: &str,
        _label_selector: &str,
        _limit: u32,
    ) -> Result<Vec<shepherd_core::provider::ObservedVm>, shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches list_vms")
    }

    async fn detect_capabilities(
        &self,
        _cancel: &dyn shepherd_core::provider::Cancellation,
        _cluster_id: uuid::Uuid,
    ) -> Result<shepherd_core::provider::ClusterCapabilities, shepherd_core::provider::ProviderError> {
        unreachable!("the maintenance queue never dispatches detect_capabilities")
    }
}
