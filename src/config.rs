//! Configuration
//!
//! Three layers, later wins:
//! 1. built-in defaults
//! 2. optional TOML file (`--config`), sections `[general]`, `[monitor]`,
//!    `[tonapi]`, `[getgems]`
//! 3. environment (`.env` loaded by `main` via dotenv)
//!
//! Secrets (TONAPI_TOKEN, BOT_TOKEN, NOTIFY_CHAT, DISCORD_WEBHOOK) are read
//! from the environment only.
//!
//! Created: 2026-03-06

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{parse_address_list, TonAddress};
use crate::chain::tonapi::DEFAULT_BASE_URL;
use crate::chain::RetryPolicy;
use crate::enrichment::getgems::DEFAULT_API_URL;
use crate::scanner::{ScanSettings, DEFAULT_PROBE_METHODS};

/// Addresses to poll and the collections that qualify a sale.
/// Built once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredSet {
    pub royalty_addresses: Vec<TonAddress>,
    pub collections: HashSet<TonAddress>,
}

impl MonitoredSet {
    /// Duplicate royalty addresses are dropped, first occurrence kept.
    pub fn new(royalty_addresses: Vec<TonAddress>, collections: HashSet<TonAddress>) -> Self {
        let mut seen = HashSet::new();
        let royalty_addresses = royalty_addresses.into_iter().filter(|a| seen.insert(*a)).collect();
        Self {
            royalty_addresses,
            collections,
        }
    }

    pub fn is_monitored_collection(&self, collection: &TonAddress) -> bool {
        self.collections.contains(collection)
    }
}

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub tonapi: TonApiConfig,
    #[serde(default)]
    pub getgems: GetgemsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_watermark_dir")]
    pub watermark_dir: String,
    #[serde(default = "default_true")]
    pub concurrent_scans: bool,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub royalty_addresses: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default = "default_tx_limit")]
    pub tx_limit: u32,
    #[serde(default = "default_probe_methods")]
    pub probe_methods: Vec<String>,
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    #[serde(default = "default_probe_delay")]
    pub probe_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TonApiConfig {
    #[serde(default = "default_tonapi_url")]
    pub base_url: String,
    /// Minimum spacing between consecutive indexer requests
    #[serde(default = "default_request_interval")]
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetgemsConfig {
    #[serde(default = "default_getgems_url")]
    pub api_url: String,
}

fn default_poll_interval() -> u64 { 180 }
fn default_watermark_dir() -> String { "./data".to_string() }
fn default_true() -> bool { true }
fn default_http_timeout() -> u64 { 10 }
fn default_tx_limit() -> u32 { 25 }
fn default_probe_methods() -> Vec<String> { DEFAULT_PROBE_METHODS.iter().map(|m| m.to_string()).collect() }
fn default_probe_attempts() -> u32 { 3 }
fn default_probe_delay() -> u64 { 2000 }
fn default_tonapi_url() -> String { DEFAULT_BASE_URL.to_string() }
fn default_request_interval() -> u64 { 1000 }
fn default_getgems_url() -> String { DEFAULT_API_URL.to_string() }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            watermark_dir: default_watermark_dir(),
            concurrent_scans: true,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            royalty_addresses: Vec::new(),
            collections: Vec::new(),
            tx_limit: default_tx_limit(),
            probe_methods: default_probe_methods(),
            probe_attempts: default_probe_attempts(),
            probe_delay_ms: default_probe_delay(),
        }
    }
}

impl Default for TonApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_tonapi_url(),
            min_request_interval_ms: default_request_interval(),
        }
    }
}

impl Default for GetgemsConfig {
    fn default() -> Self {
        Self {
            api_url: default_getgems_url(),
        }
    }
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub monitored: MonitoredSet,
    pub poll_interval: Duration,
    pub concurrent_scans: bool,
    pub watermark_dir: PathBuf,
    pub http_timeout: Duration,
    pub request_interval: Duration,
    pub tonapi_base_url: String,
    pub tonapi_token: Option<String>,
    pub getgems_api_url: String,
    pub scan: ScanSettings,
}

impl Config {
    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => TomlConfig::load(p)?,
            None => TomlConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Apply environment overrides from `env` on top of `file` and validate.
    pub fn resolve<F>(file: TomlConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let royalty_addresses = match var("ROYALTY_ADDRESSES") {
            Some(raw) => parse_address_list(&raw).context("Invalid ROYALTY_ADDRESSES")?,
            None => parse_each(&file.monitor.royalty_addresses).context("Invalid monitor.royalty_addresses")?,
        };
        let collections = match var("COLLECTIONS") {
            Some(raw) => parse_address_list(&raw).context("Invalid COLLECTIONS")?,
            None => parse_each(&file.monitor.collections).context("Invalid monitor.collections")?,
        };

        if royalty_addresses.is_empty() {
            bail!("No royalty addresses configured (ROYALTY_ADDRESSES or monitor.royalty_addresses)");
        }
        if collections.is_empty() {
            bail!("No collections configured (COLLECTIONS or monitor.collections)");
        }

        let poll_interval_secs = match var("POLL_INTERVAL_SECS") {
            Some(v) => v.parse::<u64>().context("POLL_INTERVAL_SECS must be an integer")?,
            None => file.general.poll_interval_secs,
        };
        let tx_limit = match var("TX_LIMIT") {
            Some(v) => v.parse::<u32>().context("TX_LIMIT must be an integer")?,
            None => file.monitor.tx_limit,
        };
        if poll_interval_secs == 0 {
            bail!("Poll interval must be at least 1 second");
        }
        if tx_limit == 0 {
            bail!("Transaction limit must be at least 1");
        }
        if file.monitor.probe_methods.is_empty() {
            bail!("monitor.probe_methods must name at least one get-method");
        }

        let http_timeout = Duration::from_secs(file.general.http_timeout_secs.max(1));
        let scan = ScanSettings {
            tx_limit,
            probe_retry: RetryPolicy::fixed(
                file.monitor.probe_attempts.max(1),
                Duration::from_millis(file.monitor.probe_delay_ms),
            ),
            // the HTTP client enforces its own timeout; this also covers limiter waits
            call_timeout: http_timeout * 2,
            probe_methods: file.monitor.probe_methods,
        };

        Ok(Self {
            monitored: MonitoredSet::new(royalty_addresses, collections.into_iter().collect()),
            poll_interval: Duration::from_secs(poll_interval_secs),
            concurrent_scans: file.general.concurrent_scans,
            watermark_dir: PathBuf::from(var("WATERMARK_DIR").unwrap_or(file.general.watermark_dir)),
            http_timeout,
            request_interval: Duration::from_millis(file.tonapi.min_request_interval_ms),
            tonapi_base_url: var("TONAPI_BASE_URL").unwrap_or(file.tonapi.base_url),
            tonapi_token: var("TONAPI_TOKEN"),
            getgems_api_url: var("GETGEMS_API_URL").unwrap_or(file.getgems.api_url),
            scan,
        })
    }
}

fn parse_each(items: &[String]) -> Result<Vec<TonAddress>> {
    items
        .iter()
        .map(|s| s.trim().parse::<TonAddress>().with_context(|| format!("Bad address '{}'", s)))
        .collect()
}
