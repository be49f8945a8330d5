//! Configuration schema and loading for CodeCheck services
//!
//! Bootstrap configuration comes from a TOML file. Values resolve in this order:
//!
//! 1. Command-line arguments (`--database`, `--port`, `--host`)
//! 2. Environment variables (`CODECHECK_DATABASE`, `CODECHECK_PORT`, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants below)
//!
//! A missing TOML file is not an error: the service starts on defaults and logs
//! a warning. A TOML file that exists but does not parse, or holds values
//! outside their valid range, is rejected with [`Error::Config`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the database path
pub const ENV_DATABASE: &str = "CODECHECK_DATABASE";
/// Environment variable overriding the HTTP port
pub const ENV_PORT: &str = "CODECHECK_PORT";
/// Environment variable overriding the TOML config location
pub const ENV_CONFIG: &str = "CODECHECK_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            ai: AiConfig::default(),
            pipeline: PipelineConfig::default(),
            fetch: FetchConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// AI-assisted extraction settings
///
/// `api_key` is the lowest-priority credential source; environment variables win.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_ai_model")]
    pub model: String,

    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,

    /// Completion requests allowed per minute across all running loads
    #[serde(default = "default_ai_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_ai_model(),
            base_url: default_ai_base_url(),
            max_tokens: default_ai_max_tokens(),
            temperature: default_ai_temperature(),
            requests_per_minute: default_ai_requests_per_minute(),
        }
    }
}

/// Acquisition pipeline tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Rules scoring below this are discarded before persistence
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Upper bound for one section's AI extraction before falling back to patterns
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,

    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,

    /// Running jobs without a heartbeat for this long are failed at startup
    #[serde(default = "default_stale_job_timeout_secs")]
    pub stale_job_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            extraction_concurrency: default_extraction_concurrency(),
            stale_job_timeout_secs: default_stale_job_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_job_timeout_secs)
    }
}

/// Document retrieval settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Retrieve source locators over HTTP before using bundled excerpts
    #[serde(default)]
    pub remote_enabled: bool,

    /// Documents shorter than this are treated as failed fetches
    #[serde(default = "default_min_document_chars")]
    pub min_document_chars: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            min_document_chars: default_min_document_chars(),
            user_agent: default_user_agent(),
        }
    }
}

/// Jurisdiction-specific code sources layered on top of the model codes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub sources: Vec<ConfiguredSource>,
}

/// One `[[discovery.sources]]` entry
///
/// Applies when `state` matches the jurisdiction's state, or `jurisdiction`
/// matches its name (both case-insensitive). An entry with neither key set
/// applies to every jurisdiction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfiguredSource {
    pub name: String,
    pub code_family: String,
    pub edition: String,
    pub locator: String,
    /// model_code, state_code, municipal_code or amendment
    pub source_type: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ai_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_ai_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_ai_max_tokens() -> u32 {
    4000
}

fn default_ai_temperature() -> f32 {
    0.1
}

fn default_ai_requests_per_minute() -> u32 {
    50
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_extraction_timeout_secs() -> u64 {
    60
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_extraction_concurrency() -> usize {
    2
}

fn default_stale_job_timeout_secs() -> u64 {
    1800
}

fn default_min_document_chars() -> usize {
    100
}

fn default_user_agent() -> String {
    format!("codecheck-jit/{}", env!("CARGO_PKG_VERSION"))
}

impl TomlConfig {
    /// Parse configuration text and validate value ranges
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.pipeline.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "pipeline.confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.pipeline.fetch_concurrency == 0 || self.pipeline.extraction_concurrency == 0 {
            return Err(Error::Config(
                "pipeline concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.pipeline.fetch_timeout_secs == 0 || self.pipeline.extraction_timeout_secs == 0 {
            return Err(Error::Config(
                "pipeline timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.ai.requests_per_minute == 0 {
            return Err(Error::Config(
                "ai.requests_per_minute must be at least 1".to_string(),
            ));
        }
        for source in &self.discovery.sources {
            if source.name.trim().is_empty() || source.locator.trim().is_empty() {
                return Err(Error::Config(format!(
                    "discovery source '{}' needs a name and a locator",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// Default TOML location: `~/.config/codecheck/<module>.toml`
pub fn default_config_path(module: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("codecheck").join(format!("{}.toml", module)))
}

/// Default database location: `<local data dir>/codecheck/codecheck.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codecheck")
        .join("codecheck.db")
}

/// Load TOML configuration, falling back to defaults when the file is absent
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve the database path: CLI → ENV → TOML → default
pub fn resolve_database_path(cli: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli {
        info!("Database path from command line: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(value) = std::env::var(ENV_DATABASE) {
        if !value.trim().is_empty() {
            info!("Database path from {}: {}", ENV_DATABASE, value);
            return PathBuf::from(value);
        }
    }

    if let Some(path) = &toml_config.database_path {
        info!("Database path from TOML config: {}", path.display());
        return path.clone();
    }

    let path = default_database_path();
    info!("Database path (default): {}", path.display());
    path
}

/// Resolve the HTTP port: CLI → ENV → TOML (which carries the default)
pub fn resolve_port(cli: Option<u16>, toml_config: &TomlConfig) -> u16 {
    if let Some(port) = cli {
        return port;
    }

    match std::env::var(ENV_PORT) {
        Ok(value) => match value.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!("Ignoring invalid {}='{}'", ENV_PORT, value);
                toml_config.port
            }
        },
        Err(_) => toml_config.port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 5730);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.confidence_threshold, 0.5);
        assert_eq!(config.pipeline.fetch_concurrency, 4);
        assert!(!config.fetch.remote_enabled);
        assert!(config.ai.api_key.is_none());
        assert!(config.discovery.sources.is_empty());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            port = 6000

            [pipeline]
            confidence_threshold = 0.75

            [[discovery.sources]]
            name = "Colorado amendments"
            code_family = "IRC"
            edition = "2021"
            locator = "https://example.org/co-irc"
            source_type = "amendment"
            state = "CO"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.pipeline.confidence_threshold, 0.75);
        assert_eq!(config.pipeline.extraction_timeout_secs, 60);
        assert_eq!(config.discovery.sources.len(), 1);
        assert_eq!(config.discovery.sources[0].state.as_deref(), Some("CO"));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let err = TomlConfig::from_toml_str("[pipeline]\nconfidence_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = TomlConfig::from_toml_str("[pipeline]\nfetch_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn test_unparseable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "port = \"not a number").unwrap();
        assert!(load_toml_config(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_database_path_priority() {
        let toml_config = TomlConfig {
            database_path: Some(PathBuf::from("/toml/codecheck.db")),
            ..TomlConfig::default()
        };

        std::env::set_var(ENV_DATABASE, "/env/codecheck.db");
        assert_eq!(
            resolve_database_path(Some(Path::new("/cli/codecheck.db")), &toml_config),
            PathBuf::from("/cli/codecheck.db")
        );
        assert_eq!(
            resolve_database_path(None, &toml_config),
            PathBuf::from("/env/codecheck.db")
        );

        std::env::remove_var(ENV_DATABASE);
        assert_eq!(
            resolve_database_path(None, &toml_config),
            PathBuf::from("/toml/codecheck.db")
        );
    }

    #[test]
    #[serial]
    fn test_invalid_env_port_ignored() {
        let toml_config = TomlConfig::default();
        std::env::set_var(ENV_PORT, "not-a-port");
        assert_eq!(resolve_port(None, &toml_config), toml_config.port);
        std::env::set_var(ENV_PORT, "7000");
        assert_eq!(resolve_port(None, &toml_config), 7000);
        assert_eq!(resolve_port(Some(8000), &toml_config), 8000);
        std::env::remove_var(ENV_PORT);
    }
}
