//! Application configuration for sourceflow.
//!
//! User config lives at `~/.sourceflow/sourceflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SourceflowError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sourceflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sourceflow";

// ---------------------------------------------------------------------------
// Config structs (matching sourceflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Notebook service connection.
    #[serde(default)]
    pub api: ApiConfig,

    /// Defaults applied when adding sources.
    #[serde(default)]
    pub ingest: IngestDefaults,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the notebook service, e.g. `http://localhost:5055`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout. Transformations can take minutes.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:5055".into()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_user_agent() -> String {
    concat!("sourceflow/", env!("CARGO_PKG_VERSION")).into()
}

/// `[ingest]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestDefaults {
    /// Forwarded to source creation.
    #[serde(default)]
    pub async_processing: bool,

    /// Transformations applied when none are selected explicitly.
    #[serde(default)]
    pub default_transformations: Vec<String>,

    /// Notebooks a new source joins when none are selected explicitly.
    #[serde(default)]
    pub default_notebooks: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sourceflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SourceflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sourceflow/sourceflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SourceflowError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SourceflowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SourceflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SourceflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SourceflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the service base URL is an absolute http(s) URL.
pub fn validate_base_url(config: &AppConfig) -> Result<Url> {
    let raw = config.api.base_url.trim();
    let url = Url::parse(raw)
        .map_err(|e| SourceflowError::config(format!("invalid api.base_url '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SourceflowError::config(format!(
            "api.base_url must use http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("localhost:5055"));
    }

    #[test]
    fn config_with_ingest_defaults() {
        let toml_str = r#"
[api]
base_url = "https://notebooks.internal:8443"

[ingest]
async_processing = true
default_transformations = ["transformation:summary", "transformation:keypoints"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.api.timeout_secs, 300);
        assert!(config.ingest.async_processing);
        assert_eq!(config.ingest.default_transformations.len(), 2);
        assert!(config.ingest.default_notebooks.is_empty());
    }

    #[test]
    fn base_url_validation() {
        let mut config = AppConfig::default();
        assert!(validate_base_url(&config).is_ok());

        config.api.base_url = "ftp://example.com".into();
        let err = validate_base_url(&config).unwrap_err();
        assert!(err.to_string().contains("http or https"));

        config.api.base_url = "not a url".into();
        assert!(validate_base_url(&config).is_err());
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = load_config_from(Path::new("/nonexistent/sourceflow.toml")).unwrap_err();
        assert!(matches!(err, SourceflowError::Io { .. }));
    }
}
