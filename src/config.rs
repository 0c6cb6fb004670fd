use crate::connection::{AccountKey, ConnectionOptions};
use crate::pagination::ScanOptions;
use crate::provision::ProvisioningOptions;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_PREFERRED_REGION: &str = "East US 2";
const DEFAULT_THROUGHPUT: u32 = 400;
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_SCAN_CAP: u32 = 100_000;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Read-freshness guarantee requested from the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    #[value(alias = "bounded_staleness")]
    #[serde(alias = "bounded-staleness")]
    BoundedStaleness,
    Session,
    #[value(alias = "consistent_prefix")]
    #[serde(alias = "consistent-prefix")]
    ConsistentPrefix,
    Eventual,
}

/// How requests reach the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Gateway,
    Direct,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Gateway => write!(f, "gateway"),
            ConnectionMode::Direct => write!(f, "direct"),
        }
    }
}

/// Which `DocumentStore` implementation backs the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Cosmos,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Cosmos => write!(f, "cosmos"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: StoreBackend,
    pub endpoint: Option<String>,
    pub key: Option<AccountKey>,
    pub database: String,
    pub container: String,
    pub preferred_regions: Vec<String>,
    pub consistency: ConsistencyLevel,
    pub connection_mode: ConnectionMode,
    pub throughput: Option<u32>,
    pub automatic_indexing: bool,
    pub page_size: u32,
    pub scan_cap: Option<u32>,
    pub accept_invalid_certs: bool,
    pub http_bind_address: SocketAddr,
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            backend: cli_backend,
            endpoint: cli_endpoint,
            key: cli_key,
            database: cli_database,
            container: cli_container,
            preferred_regions: cli_preferred_regions,
            consistency: cli_consistency,
            connection_mode: cli_connection_mode,
            throughput: cli_throughput,
            automatic_indexing: cli_automatic_indexing,
            page_size: cli_page_size,
            scan_cap: cli_scan_cap,
            accept_invalid_certs: cli_accept_invalid_certs,
            http_bind: cli_http_bind,
            shutdown_timeout_secs: cli_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            backend: file_backend,
            endpoint: file_endpoint,
            key: file_key,
            database: file_database,
            container: file_container,
            preferred_regions: file_preferred_regions,
            consistency: file_consistency,
            connection_mode: file_connection_mode,
            throughput: file_throughput,
            automatic_indexing: file_automatic_indexing,
            page_size: file_page_size,
            scan_cap: file_scan_cap,
            accept_invalid_certs: file_accept_invalid_certs,
            http_bind: file_http_bind,
            shutdown_timeout_secs: file_shutdown_timeout_secs,
        } = file_config;

        let backend = cli_backend.or(file_backend).unwrap_or(StoreBackend::Cosmos);

        let endpoint = cli_endpoint
            .or(file_endpoint)
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty());
        let key = cli_key
            .or(file_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(AccountKey::new);

        let database = cli_database
            .or(file_database)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .context("a database name is required (--database or ASYNC_COSMOS_DATABASE)")?;
        let container = cli_container
            .or(file_container)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .context("a container name is required (--container or ASYNC_COSMOS_CONTAINER)")?;

        let mut preferred_regions = Vec::new();
        for region in cli_preferred_regions
            .or(file_preferred_regions)
            .unwrap_or_else(|| vec![DEFAULT_PREFERRED_REGION.to_string()])
        {
            let region = region.trim().to_string();
            if !region.is_empty() && !preferred_regions.contains(&region) {
                preferred_regions.push(region);
            }
        }

        let consistency = cli_consistency
            .or(file_consistency)
            .unwrap_or(ConsistencyLevel::Session);
        let connection_mode = cli_connection_mode
            .or(file_connection_mode)
            .unwrap_or(ConnectionMode::Gateway);

        // zero means "no provisioned throughput" (shared or serverless accounts)
        let throughput = match cli_throughput.or(file_throughput) {
            Some(0) => None,
            Some(value) => Some(value),
            None => Some(DEFAULT_THROUGHPUT),
        };

        let automatic_indexing = cli_automatic_indexing
            .or(file_automatic_indexing)
            .unwrap_or(false);

        let page_size = cli_page_size.or(file_page_size).unwrap_or(DEFAULT_PAGE_SIZE);
        anyhow::ensure!(page_size > 0, "page size must be at least 1");

        let scan_cap = match cli_scan_cap.or(file_scan_cap) {
            Some(0) => None,
            Some(value) => Some(value),
            None => Some(DEFAULT_SCAN_CAP),
        };

        let accept_invalid_certs = cli_accept_invalid_certs || file_accept_invalid_certs.unwrap_or(false);

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address is invalid")?,
        };

        let shutdown_timeout_secs = cli_shutdown_timeout_secs
            .or(file_shutdown_timeout_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        Ok(Self {
            backend,
            endpoint,
            key,
            database,
            container,
            preferred_regions,
            consistency,
            connection_mode,
            throughput,
            automatic_indexing,
            page_size,
            scan_cap,
            accept_invalid_certs,
            http_bind_address,
            shutdown_timeout_secs,
        })
    }

    /// Fail fast on settings that would only break at the first store call.
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Cosmos {
            let endpoint = self
                .endpoint
                .as_deref()
                .context("an account endpoint is required for the cosmos backend")?;
            let url = reqwest::Url::parse(endpoint)
                .with_context(|| format!("account endpoint `{endpoint}` is not a valid URL"))?;
            anyhow::ensure!(
                matches!(url.scheme(), "https" | "http"),
                "account endpoint `{}` must use http or https",
                endpoint
            );
            anyhow::ensure!(
                self.key.is_some(),
                "an account key is required for the cosmos backend"
            );
            anyhow::ensure!(
                self.connection_mode == ConnectionMode::Gateway,
                "connection mode `{}` is not supported; use gateway",
                self.connection_mode
            );
        }
        anyhow::ensure!(self.page_size > 0, "page size must be at least 1");
        Ok(())
    }

    /// Options for the connection manager. Only meaningful for the cosmos backend.
    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        let endpoint = self
            .endpoint
            .clone()
            .context("an account endpoint is required for the cosmos backend")?;
        let key = self
            .key
            .clone()
            .context("an account key is required for the cosmos backend")?;
        Ok(ConnectionOptions {
            endpoint,
            key,
            preferred_regions: self.preferred_regions.clone(),
            consistency: self.consistency,
            mode: self.connection_mode,
            accept_invalid_certs: self.accept_invalid_certs,
        })
    }

    pub fn provisioning_options(&self) -> ProvisioningOptions {
        ProvisioningOptions::new(&self.database, &self.container)
            .with_throughput(self.throughput)
            .with_automatic_indexing(self.automatic_indexing)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            page_size: self.page_size,
            result_cap: self.scan_cap,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "async-cosmos", about = "Project repository over a Cosmos DB account", version)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_BACKEND",
        value_enum,
        value_name = "BACKEND",
        help = "Document store backend (cosmos or memory)"
    )]
    pub backend: Option<StoreBackend>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_ENDPOINT",
        value_name = "URL",
        help = "Account endpoint, e.g. https://myaccount.documents.azure.com:443/"
    )]
    pub endpoint: Option<String>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Account master key (base64)"
    )]
    pub key: Option<String>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_DATABASE",
        value_name = "NAME",
        help = "Database holding the projects container"
    )]
    pub database: Option<String>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_CONTAINER",
        value_name = "NAME",
        help = "Container holding project documents"
    )]
    pub container: Option<String>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_PREFERRED_REGIONS",
        value_name = "REGION",
        value_delimiter = ',',
        help = "Comma-separated preferred read regions, most preferred first"
    )]
    pub preferred_regions: Option<Vec<String>>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_CONSISTENCY",
        value_enum,
        value_name = "LEVEL",
        help = "Consistency level requested on reads"
    )]
    pub consistency: Option<ConsistencyLevel>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_CONNECTION_MODE",
        value_enum,
        value_name = "MODE",
        help = "Connection mode (gateway or direct)"
    )]
    pub connection_mode: Option<ConnectionMode>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_THROUGHPUT",
        value_name = "RU",
        help = "Manual throughput for a newly created container (0 disables)",
        value_parser = clap::value_parser!(u32)
    )]
    pub throughput: Option<u32>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_AUTOMATIC_INDEXING",
        value_name = "BOOL",
        help = "Enable automatic indexing on a newly created container"
    )]
    pub automatic_indexing: Option<bool>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_PAGE_SIZE",
        value_name = "N",
        help = "Documents per page when scanning",
        value_parser = clap::value_parser!(u32)
    )]
    pub page_size: Option<u32>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_SCAN_CAP",
        value_name = "N",
        help = "Maximum documents returned by one scan (0 for no cap)",
        value_parser = clap::value_parser!(u32)
    )]
    pub scan_cap: Option<u32>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_ACCEPT_INVALID_CERTS",
        help = "Accept self-signed TLS certificates (local emulator only)"
    )]
    pub accept_invalid_certs: bool,

    #[arg(
        long,
        env = "ASYNC_COSMOS_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address for the REST API"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "ASYNC_COSMOS_SHUTDOWN_TIMEOUT",
        value_name = "SECS",
        help = "Upper bound on graceful shutdown"
    )]
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    backend: Option<StoreBackend>,
    endpoint: Option<String>,
    key: Option<String>,
    database: Option<String>,
    container: Option<String>,
    preferred_regions: Option<Vec<String>>,
    consistency: Option<ConsistencyLevel>,
    connection_mode: Option<ConnectionMode>,
    throughput: Option<u32>,
    automatic_indexing: Option<bool>,
    page_size: Option<u32>,
    scan_cap: Option<u32>,
    accept_invalid_certs: Option<bool>,
    http_bind: Option<SocketAddr>,
    shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
