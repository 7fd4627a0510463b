//! Bootstrap binary for the Shepherd control plane (spec §6). Wires config
//! and secret resolution, tracing, the Postgres pool, the KubeVirt cluster
//! provider, the HTTP API and the worker pool together, the way the
//! teacher's own operator binaries (`crates/*/src/main.rs`) construct a
//! `Client` once and hand cheap clones to every long-running task.

mod config;

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use shepherd_api::{ApiOptions, ApiServer, AppState, SessionIdentityProvider};
use shepherd_worker::{KubeVirtProvider, PoolConfig, StaticClusterClients};
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SESSION_SECRET_NAME: &str = "session_secret";
const ENCRYPTION_KEY_NAME: &str = "encryption_key";

#[derive(Debug, Parser)]
#[command(name = "shepherd", author, version, about = "Shepherd control plane")]
struct Cli {
    /// Optional TOML config file. Env vars still win over anything set here
    /// (spec §6); secrets are never read from this file.
    #[arg(long, env = "SHEPHERD_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to load configuration"))]
    Config { source: config::Error },

    #[snafu(display("failed to install the tracing subscriber"))]
    Telemetry { source: shepherd_telemetry::Error },

    #[snafu(display("failed to connect to postgres"))]
    Connect { source: shepherd_store::error::Error },

    #[snafu(display("failed to resolve a system secret"))]
    Secret { source: shepherd_store::error::Error },

    #[snafu(display("failed to build a kube client for cluster {cluster}"))]
    KubeClient { cluster: String, source: kube::Error },

    #[snafu(display("failed to list registered clusters"))]
    ListClusters { source: shepherd_store::error::Error },

    #[snafu(display("api server failed"))]
    Server { source: shepherd_api::ServerError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref()).context(ConfigSnafu)?;

    let telemetry_settings = shepherd_telemetry::Settings {
        default_level: settings.log_level.clone(),
        ..shepherd_telemetry::Settings::new("LOG_LEVEL")
    };
    let _telemetry_guard = shepherd_telemetry::init(&telemetry_settings).context(TelemetrySnafu)?;

    tracing::info!(server_port = settings.server_port, worker_pool_size = settings.worker_pool_size, "starting shepherd");

    let pool = shepherd_store::connect(&settings.database_url, settings.max_connections)
        .await
        .context(ConnectSnafu)?;

    let session_secret = resolve_secret(&pool, "SESSION_SECRET", SESSION_SECRET_NAME).await?;
    let encryption_key = resolve_secret(&pool, "ENCRYPTION_KEY", ENCRYPTION_KEY_NAME).await?;

    let identity_provider = Arc::new(SessionIdentityProvider::new(session_secret));

    let state = AppState {
        pool: pool.clone(),
        identity_provider,
        vnc_signing_key: Arc::from(encryption_key.into_boxed_slice()),
        vnc_token_ttl: chrono::Duration::hours(2),
        batch_throttle: shepherd_core::throttle::BatchThrottleConfig::default(),
    };

    let router = shepherd_api::build_router(state);
    let api_options = ApiOptions::builder()
        .bind_address(settings.bind_addr, settings.server_port)
        .build();
    let server = ApiServer::new(router, api_options);

    let cluster_provider = Arc::new(build_cluster_provider(&pool, settings.kubeconfig_dir.as_deref()).await?);
    let shutdown = CancellationToken::new();
    let pool_config = PoolConfig {
        vm_operations_concurrency: settings.worker_pool_size,
        ..PoolConfig::default()
    };

    let worker_handle = tokio::spawn(shepherd_worker::run(
        pool.clone(),
        cluster_provider,
        pool_config,
        shutdown.clone(),
    ));

    server.run().await.context(ServerSnafu)?;

    tracing::info!("api server stopped, shutting down the worker pool");
    shutdown.cancel();
    let _ = worker_handle.await;

    Ok(())
}

/// Resolves a secret with the priority named in spec §6: an environment
/// variable first, then whatever is already persisted, generating and
/// persisting a fresh 32-byte CSPRNG value only the first time `db_name` is
/// seen. Never sourced from the config file.
async fn resolve_secret(pool: &sqlx::PgPool, env_var: &str, db_name: &str) -> Result<Vec<u8>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(value.into_bytes());
    }
    let mut conn = pool.acquire().await.map_err(shepherd_store::error::Error::from).context(SecretSnafu)?;
    shepherd_store::secrets::get_or_generate(&mut conn, db_name)
        .await
        .context(SecretSnafu)
}

/// Builds one `kube::Client` per registered cluster. Loading the cluster's
/// own kubeconfig from `kubeconfig_dir/{kubeconfig_secret_ref}` is attempted
/// first; with no directory configured (or a cluster missing its file) the
/// ambient in-cluster/local kubeconfig is shared instead — the secret
/// bootstrap plumbing that would resolve `kubeconfig_secret_ref` against a
/// real secret store is explicitly out of scope (spec §1).
async fn build_cluster_provider(
    pool: &sqlx::PgPool,
    kubeconfig_dir: Option<&std::path::Path>,
) -> Result<KubeVirtProvider<StaticClusterClients>> {
    let mut conn = pool.acquire().await.map_err(shepherd_store::error::Error::from).context(ListClustersSnafu)?;
    let clusters = shepherd_store::catalog::list_clusters(&mut conn).await.context(ListClustersSnafu)?;

    let mut clients: BTreeMap<Uuid, Client> = BTreeMap::new();
    for cluster in clusters {
        let from_file = match kubeconfig_dir {
            Some(dir) => client_from_kubeconfig(&dir.join(&cluster.kubeconfig_secret_ref)).await,
            None => None,
        };
        let client = match from_file {
            Some(client) => client,
            None => default_client().await.context(KubeClientSnafu { cluster: cluster.name.clone() })?,
        };
        clients.insert(cluster.id, client);
    }

    Ok(KubeVirtProvider::new(StaticClusterClients::new(clients)))
}

async fn client_from_kubeconfig(path: &std::path::Path) -> Option<Client> {
    let kubeconfig = kube::config::Kubeconfig::read_from(path).ok()?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
        .await
        .ok()?;
    Client::try_from(config).ok()
}

async fn default_client() -> std::result::Result<Client, kube::Error> {
    Client::try_default().await
}
