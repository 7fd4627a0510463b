//! Configuration loading (spec §6): `DATABASE_URL` is required; `SERVER_PORT`,
//! `LOG_LEVEL`, worker pool size and the kubeconfig directory are optional.
//! Priority for these general settings is env vars → config file → built-in
//! defaults. Secrets (`ENCRYPTION_KEY`, `SESSION_SECRET`) are deliberately
//! excluded from the config file layer — they resolve as env var → a value
//! already persisted in `system_secrets` → a freshly generated one
//! ([`shepherd_store::secrets::get_or_generate`]), never from a file.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("DATABASE_URL is not set and no database_url is configured in the config file"))]
    MissingDatabaseUrl,

    #[snafu(display("failed to read config file {path:?}"))]
    ReadConfigFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse config file {path:?} as TOML"))]
    ParseConfigFile { path: PathBuf, source: toml::de::Error },

    #[snafu(display("SERVER_PORT / server_port {value:?} is not a valid port number"))]
    InvalidPort { value: String },

    #[snafu(display("worker pool size {value:?} is not a valid positive integer"))]
    InvalidWorkerConcurrency { value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The subset of settings a config file may carry. Deliberately has no
/// fields for `encryption_key`/`session_secret` — the config-file layer
/// never sources secrets (spec §6).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    server_port: Option<u16>,
    log_level: Option<String>,
    worker_pool_size: Option<usize>,
    kubeconfig_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: IpAddr,
    pub server_port: u16,
    pub log_level: String,
    pub worker_pool_size: usize,
    pub max_connections: u32,
    pub kubeconfig_dir: Option<PathBuf>,
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let contents = std::fs::read_to_string(path).context(ReadConfigFileSnafu { path })?;
    toml::from_str(&contents).context(ParseConfigFileSnafu { path })
}

/// Resolves settings with the documented priority: env var, then config
/// file, then built-in default.
pub fn load(config_path: Option<&Path>) -> Result<Config> {
    let file = read_file_config(config_path)?;

    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or(file.database_url)
        .context(MissingDatabaseUrlSnafu)?;

    let server_port = match std::env::var("SERVER_PORT").ok() {
        Some(value) => value.parse().ok().context(InvalidPortSnafu { value })?,
        None => file.server_port.unwrap_or(DEFAULT_SERVER_PORT),
    };

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or(file.log_level)
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    let worker_pool_size = match std::env::var("WORKER_POOL_SIZE").ok() {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .context(InvalidWorkerConcurrencySnafu { value })?,
        None => file.worker_pool_size.unwrap_or(DEFAULT_WORKER_CONCURRENCY),
    };

    let kubeconfig_dir = std::env::var("KUBECONFIG_DIR").ok().map(PathBuf::from).or(file.kubeconfig_dir);

    Ok(Config {
        database_url,
        bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        server_port,
        log_level,
        worker_pool_size,
        max_connections: DEFAULT_MAX_CONNECTIONS,
        kubeconfig_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases live in one test function (rather than two `#[test]`s) so
    // they can't interleave with another thread's use of the same env var —
    // `std::env::set_var`/`remove_var` are process-global.
    #[test]
    fn database_url_resolution_prefers_env_over_file_and_errors_when_absent() {
        // SAFETY: this test owns DATABASE_URL for its whole body and runs
        // both assertions before any other thread could observe the var.
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        assert!(matches!(load(None), Err(Error::MissingDatabaseUrl)));

        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://env/value");
        }
        let file = FileConfig {
            database_url: Some("postgres://file/value".to_string()),
            ..FileConfig::default()
        };
        let database_url = std::env::var("DATABASE_URL").ok().or(file.database_url).unwrap();
        assert_eq!(database_url, "postgres://env/value");

        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
    }
}
