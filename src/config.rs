use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Cache version baked into this build.
pub const DEFAULT_CACHE_VERSION: &str = "wildlife-incident-v4";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the controller serves; requests to any other origin pass through
  pub origin: Url,
  /// Name of the current cache store; older stores are purged on activation
  pub cache_version: String,
  pub install: InstallConfig,
  /// Page served to navigations that fail without a cached copy
  pub offline_page: String,
  /// Path prefix of dynamic data endpoints
  pub api_prefix: String,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache_version: DEFAULT_CACHE_VERSION.to_string(),
      install: InstallConfig::default(),
      offline_page: "/offline".to_string(),
      api_prefix: "/api/".to_string(),
      storage: StorageConfig::default(),
    }
  }
}

fn default_origin() -> Url {
  Url::parse("http://localhost:5000").expect("static origin is valid")
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallPolicy {
  /// Every precache URL must succeed or installation fails
  Strict,
  /// Critical URLs must succeed; the rest are cached best-effort
  #[default]
  Staged,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
  pub policy: InstallPolicy,
  /// URLs cached during installation
  pub precache: Vec<String>,
  /// Subset that must be cached for a staged install to succeed
  pub critical: Vec<String>,
}

impl Default for InstallConfig {
  fn default() -> Self {
    Self {
      policy: InstallPolicy::Staged,
      precache: vec![
        "/".to_string(),
        "/offline".to_string(),
        "/static/style.css".to_string(),
        "/static/wildlife_bg.jpg".to_string(),
      ],
      critical: vec!["/".to_string(), "/offline".to_string()],
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/wildcache/cache.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./wildcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/wildcache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("wildcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("wildcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    Ok(())
  }

  /// Key that scopes cache stores to this origin, e.g. `http://localhost:5000`.
  pub fn storage_scope(&self) -> String {
    self.origin.origin().ascii_serialization()
  }

  /// Resolve a path (or absolute URL) against the configured origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }
}
