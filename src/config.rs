use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `[breach].api_key`.
pub const BREACH_API_KEY_ENV: &str = "PASSDB_HIBP_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub breach: BreachConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub reject_log: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            progress_every: default_progress_every(),
            store_timeout_secs: default_store_timeout_secs(),
            retries: default_retries(),
            reject_log: None,
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_progress_every() -> u64 {
    1000
}
fn default_store_timeout_secs() -> u64 {
    10
}
fn default_retries() -> u32 {
    1
}

impl IngestConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

fn default_per_page() -> u32 {
    50
}
fn default_max_per_page() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreachConfig {
    #[serde(default = "default_breach_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_breach_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self {
            api_url: default_breach_url(),
            api_key: None,
            user_agent: default_user_agent(),
            timeout_secs: default_breach_timeout_secs(),
        }
    }
}

fn default_breach_url() -> String {
    "https://haveibeenpwned.com/api/v3".to_string()
}
fn default_user_agent() -> String {
    "passdb".to_string()
}
fn default_breach_timeout_secs() -> u64 {
    10
}

/// Response cache in front of the lookup and breach routes.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_breach_ttl_secs")]
    pub breach_ttl_secs: u64,
    #[serde(default = "default_lookup_ttl_secs")]
    pub lookup_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            breach_ttl_secs: default_breach_ttl_secs(),
            lookup_ttl_secs: default_lookup_ttl_secs(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_breach_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_lookup_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(key) = std::env::var(BREACH_API_KEY_ENV) {
        if !key.is_empty() {
            config.breach.api_key = Some(key);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    // Validate ingest
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }
    if config.ingest.progress_every == 0 {
        anyhow::bail!("ingest.progress_every must be >= 1");
    }
    if config.ingest.store_timeout_secs == 0 {
        anyhow::bail!("ingest.store_timeout_secs must be >= 1");
    }
    if config.ingest.retries > 1 {
        anyhow::bail!("ingest.retries must be 0 or 1");
    }

    // Validate server paging
    if config.server.default_per_page == 0 {
        anyhow::bail!("server.default_per_page must be >= 1");
    }
    if config.server.default_per_page > config.server.max_per_page {
        anyhow::bail!(
            "server.default_per_page ({}) must not exceed server.max_per_page ({})",
            config.server.default_per_page,
            config.server.max_per_page
        );
    }

    if config.cache.enabled && (config.cache.breach_ttl_secs == 0 || config.cache.lookup_ttl_secs == 0)
    {
        anyhow::bail!("cache TTLs must be >= 1 second when [cache].enabled is true");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/passdb.sqlite"

[server]
bind = "127.0.0.1:3000"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.ingest.workers, 1);
        assert_eq!(config.ingest.progress_every, 1000);
        assert_eq!(config.ingest.retries, 1);
        assert_eq!(config.server.default_per_page, 50);
        assert_eq!(config.db.busy_timeout_ms, 5000);
        assert!(config.breach.api_key.is_none());
        assert_eq!(config.log.level, "info");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.breach_ttl_secs, 604_800);
        assert_eq!(config.cache.lookup_ttl_secs, 2_592_000);
    }

    #[test]
    fn zero_cache_ttl_only_matters_when_enabled() {
        let raw = format!("{}\n[cache]\nlookup_ttl_secs = 0\n", MINIMAL);
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(validate(&config).unwrap_err().to_string().contains("cache"));

        let raw = format!("{}\n[cache]\nenabled = false\nlookup_ttl_secs = 0\n", MINIMAL);
        let config: Config = toml::from_str(&raw).unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_zero_workers() {
        let raw = format!("{}\n[ingest]\nworkers = 0\n", MINIMAL);
        let config: Config = toml::from_str(&raw).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ingest.workers"));
    }

    #[test]
    fn rejects_more_than_one_retry() {
        let raw = format!("{}\n[ingest]\nretries = 3\n", MINIMAL);
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_default_page_above_max() {
        let raw = MINIMAL.replace(
            "bind = \"127.0.0.1:3000\"",
            "bind = \"127.0.0.1:3000\"\ndefault_per_page = 500\nmax_per_page = 100",
        );
        let config: Config = toml::from_str(&raw).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_per_page"));
    }
}
