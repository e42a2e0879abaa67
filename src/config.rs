use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::parse_version;
use crate::error::ConfigError;
use crate::request::ResourceClass;
use crate::strategy::StrategyKind;

/// Table used when no configuration file is found.
pub const DEFAULT_CONFIG: &str = r#"
generation: 1
network:
  timeout_ms: 5000
classification:
  api_prefixes: ["/api/"]
  document_extensions: ["html", "htm"]
fallback:
  shell_urls: ["/", "/index.html"]
strategies:
  - resource_class: document
    strategy_kind: networkFirst
    partition_name: pages
    max_age_seconds: 86400
  - resource_class: api
    strategy_kind: networkFirst
    partition_name: api-data
    max_age_seconds: 300
  - resource_class: staticAsset
    strategy_kind: cacheFirst
    partition_name: static
    max_age_seconds: 604800
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Version generation embedded in partition names
  #[serde(default = "default_generation")]
  pub generation: u64,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub classification: ClassificationConfig,
  #[serde(default)]
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub strategies: Vec<StrategyConfig>,
}

fn default_generation() -> u64 {
  1
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Prefix for descriptor urls that are not absolute
  pub base_url: Option<String>,
  /// Upper bound for a single network attempt
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
  5000
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_ms: default_timeout_ms(),
    }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite database file (default: $XDG_DATA_HOME/rrcl/store.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  #[serde(default = "default_document_extensions")]
  pub document_extensions: Vec<String>,
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_document_extensions() -> Vec<String> {
  vec!["html".to_string(), "htm".to_string()]
}

impl Default for ClassificationConfig {
  fn default() -> Self {
    Self {
      api_prefixes: default_api_prefixes(),
      document_extensions: default_document_extensions(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackConfig {
  /// Documents served when a page cannot be resolved, newest first
  #[serde(default)]
  pub shell_urls: Vec<String>,
}

/// How one resource class is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyConfig {
  #[serde(alias = "resourceClass")]
  pub resource_class: ResourceClass,
  #[serde(alias = "strategyKind")]
  pub strategy_kind: StrategyKind,
  /// Base name; the generation suffix is appended at install time
  #[serde(alias = "partitionName")]
  pub partition_name: String,
  /// Absent means entries never expire by age
  #[serde(default, alias = "maxAgeSeconds")]
  pub max_age_seconds: Option<u64>,
}

/// Longest accepted `max_age_seconds`, roughly a century.
pub const MAX_AGE_CEILING_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl StrategyConfig {
  /// Configured max age. `None` also when the value does not fit a duration,
  /// which [`Config::validate`] rejects up front.
  pub fn max_age(&self) -> Option<chrono::Duration> {
    let secs = i64::try_from(self.max_age_seconds?).ok()?;
    chrono::Duration::try_seconds(secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rrcl.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rrcl/config.yaml
  /// 4. The built-in default table
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::info!("no configuration file found, using built-in strategy table");
        Self::from_yaml(DEFAULT_CONFIG)
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("rrcl.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rrcl").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents).map_err(|e| eyre!("Config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Reject tables that would leave a request without a defined resolution.
  pub fn validate(&self) -> std::result::Result<(), ConfigError> {
    if self.generation == 0 {
      return Err(ConfigError::ZeroGeneration);
    }
    if self.network.timeout_ms == 0 {
      return Err(ConfigError::ZeroTimeout);
    }

    let mut seen = BTreeSet::new();
    for strategy in &self.strategies {
      if !seen.insert(strategy.resource_class) {
        return Err(ConfigError::DuplicateResourceClass(strategy.resource_class));
      }

      let name = strategy.partition_name.as_str();
      if name.trim().is_empty() {
        return Err(ConfigError::EmptyPartitionName(strategy.resource_class));
      }
      if name.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidPartitionName {
          name: name.to_string(),
          reason: "contains whitespace".to_string(),
        });
      }
      if parse_version(name).is_some() {
        return Err(ConfigError::InvalidPartitionName {
          name: name.to_string(),
          reason: "already ends with a version suffix".to_string(),
        });
      }

      if let Some(seconds) = strategy.max_age_seconds {
        if seconds > MAX_AGE_CEILING_SECS {
          return Err(ConfigError::MaxAgeTooLarge {
            class: strategy.resource_class,
            seconds,
            limit: MAX_AGE_CEILING_SECS,
          });
        }
      }
    }

    if !self.fallback.shell_urls.is_empty() && self.strategy_for(ResourceClass::Document).is_none()
    {
      return Err(ConfigError::ShellWithoutDocumentPartition);
    }

    Ok(())
  }

  pub fn strategy_for(&self, class: ResourceClass) -> Option<&StrategyConfig> {
    self
      .strategies
      .iter()
      .find(|strategy| strategy.resource_class == class)
  }
}
