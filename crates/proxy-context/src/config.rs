use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use interceptor_registry::{FeatureSelection, PlatformSupport, SupportLevel};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resolved feature configuration for one proxy deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Path prefix every proxied URL lives under, e.g. `/go/`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub special_interception_features: Vec<String>,
    #[serde(default)]
    pub browser_extras: Vec<String>,
    #[serde(default)]
    pub os_extras: Vec<String>,
    /// Store id for IndexedDB and WebSQL names.
    #[serde(default = "default_store_id")]
    pub idb_store_id: String,
    /// Store id for `localStorage` and `sessionStorage` keys.
    #[serde(default = "default_store_id")]
    pub session_store_id: String,
    #[serde(default = "default_store_id")]
    pub shared_storage_id: String,
    /// Support levels the platform reports per capability path. Paths not
    /// listed are assumed supported.
    #[serde(default)]
    pub platform_support: BTreeMap<String, Vec<SupportLevel>>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default = "default_bus_timeout_ms")]
    pub bus_timeout_ms: u64,
    #[serde(default = "default_escape_char")]
    pub search_param_escape_char: String,
    #[serde(default = "default_max_escapes")]
    pub max_search_param_escapes: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            special_interception_features: Vec::new(),
            browser_extras: Vec::new(),
            os_extras: Vec::new(),
            idb_store_id: default_store_id(),
            session_store_id: default_store_id(),
            shared_storage_id: default_store_id(),
            platform_support: BTreeMap::new(),
            log_level: default_log_level(),
            json_logs: false,
            bus_timeout_ms: default_bus_timeout_ms(),
            search_param_escape_char: default_escape_char(),
            max_search_param_escapes: default_max_escapes(),
        }
    }
}

impl FeatureConfig {
    pub fn feature_selection(&self) -> FeatureSelection {
        FeatureSelection {
            special_interception_features: self.special_interception_features.clone(),
            browser_extras: self.browser_extras.clone(),
            os_extras: self.os_extras.clone(),
        }
    }

    pub fn platform(&self) -> PlatformSupport {
        self.platform_support
            .iter()
            .map(|(path, levels)| (path.clone(), levels.iter().copied()))
            .collect()
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_prefix() -> String {
    "/go/".to_string()
}

fn default_store_id() -> String {
    "proxy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bus_timeout_ms() -> u64 {
    2000
}

fn default_escape_char() -> String {
    "_".to_string()
}

fn default_max_escapes() -> usize {
    url_rewrite::DEFAULT_MAX_ESCAPES
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the defaults with a warning.
pub fn load_config(path: impl AsRef<Path>) -> Result<FeatureConfig> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "feature configuration not found; using defaults");
        return Ok(FeatureConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read feature config: {}", path.display()))?;
    load_config_from_str(&contents)
        .with_context(|| format!("failed to parse feature config: {}", path.display()))
}

/// Parse and validate a [`FeatureConfig`] from a YAML string.
pub fn load_config_from_str(yaml: &str) -> Result<FeatureConfig> {
    let config: FeatureConfig = serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &FeatureConfig) -> Result<()> {
    if config.prefix.is_empty() || !config.prefix.starts_with('/') || !config.prefix.ends_with('/') {
        bail!("prefix '{}' must start and end with '/'", config.prefix);
    }
    // Every root-relative path would otherwise read as already prefixed.
    if config.prefix.trim_matches('/').is_empty() {
        bail!("prefix '{}' must contain a path segment", config.prefix);
    }

    for (field, value) in [
        ("idb_store_id", &config.idb_store_id),
        ("session_store_id", &config.session_store_id),
        ("shared_storage_id", &config.shared_storage_id),
    ] {
        if value.is_empty() {
            bail!("{field} must not be empty");
        }
    }

    if config.search_param_escape_char.chars().count() != 1 {
        bail!(
            "search_param_escape_char must be exactly one character, got '{}'",
            config.search_param_escape_char
        );
    }

    if config.bus_timeout_ms == 0 {
        bail!("bus_timeout_ms must be greater than zero");
    }

    Ok(())
}
