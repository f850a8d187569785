use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::SyncSettings;
use crate::net::{RefreshPolicy, Timeouts};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Where the store and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  /// Default log filter when RUST_LOG is not set
  pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_login_path")]
  pub login_path: String,
  #[serde(default = "default_refresh_path")]
  pub refresh_path: String,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
  #[serde(default = "default_resource_timeout")]
  pub resource_timeout_secs: u64,
}

fn default_login_path() -> String {
  "auth/token/".to_string()
}

fn default_refresh_path() -> String {
  "auth/token/refresh/".to_string()
}

fn default_request_timeout() -> u64 {
  30
}

fn default_resource_timeout() -> u64 {
  60
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a fetched collection counts as fresh
  pub ttl_secs: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { ttl_secs: 300 }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Minimum spacing between reconnect flushes
  #[serde(default = "default_debounce")]
  pub reconnect_debounce_secs: u64,
  /// What a request does when another one is already refreshing the token
  #[serde(default)]
  pub refresh_policy: RefreshPolicy,
}

fn default_debounce() -> u64 {
  5
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      reconnect_debounce_secs: default_debounce(),
      refresh_policy: RefreshPolicy::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tripsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tripsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tripsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tripsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tripsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_secs <= 0 {
      return Err(eyre!("cache.ttl_secs must be positive"));
    }
    Ok(config)
  }

  /// Directory for the store and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => dirs::data_dir()
        .map(|d| d.join("tripsync"))
        .ok_or_else(|| eyre!("No data directory available; set data_dir in the config")),
    }
  }

  pub fn sync_settings(&self) -> Result<SyncSettings> {
    let mut settings = SyncSettings::for_base_url(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url: {}", e))?;
    settings.login_path = self.api.login_path.clone();
    settings.refresh_path = self.api.refresh_path.clone();
    settings.timeouts = Timeouts {
      request: Duration::from_secs(self.api.request_timeout_secs),
      resource: Duration::from_secs(self.api.resource_timeout_secs),
    };
    settings.refresh_policy = self.sync.refresh_policy;
    settings.cache_ttl = chrono::Duration::seconds(self.cache.ttl_secs);
    settings.reconnect_debounce = Duration::from_secs(self.sync.reconnect_debounce_secs);

    settings
      .refresh_url()
      .map_err(|e| eyre!("Invalid api.refresh_path: {}", e))?;
    Ok(settings)
  }

  /// Get the account password from the environment.
  ///
  /// Checks TRIPSYNC_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("TRIPSYNC_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set TRIPSYNC_PASSWORD environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://trips.example.com/api\n").unwrap();
    let settings = config.sync_settings().unwrap();

    assert_eq!(settings.base_url.as_str(), "https://trips.example.com/api/");
    assert_eq!(settings.login_path, "auth/token/");
    assert_eq!(settings.timeouts.request, Duration::from_secs(30));
    assert_eq!(settings.timeouts.resource, Duration::from_secs(60));
    assert_eq!(settings.cache_ttl, chrono::Duration::seconds(300));
    assert_eq!(settings.refresh_policy, RefreshPolicy::Await);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  base_url: https://trips.example.com/api/
  refresh_path: auth/refresh/
  request_timeout_secs: 10
cache:
  ttl_secs: 60
sync:
  reconnect_debounce_secs: 2
  refresh_policy: fail_fast
data_dir: /tmp/tripsync
log_level: debug
"#;
    let config = Config::parse(yaml).unwrap();
    let settings = config.sync_settings().unwrap();

    assert_eq!(
      settings.refresh_url().unwrap().as_str(),
      "https://trips.example.com/api/auth/refresh/"
    );
    assert_eq!(settings.timeouts.request, Duration::from_secs(10));
    assert_eq!(settings.refresh_policy, RefreshPolicy::FailFast);
    assert_eq!(settings.reconnect_debounce, Duration::from_secs(2));
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/tripsync"));
    assert_eq!(config.log_level.as_deref(), Some("debug"));
  }

  #[test]
  fn test_rejects_non_positive_ttl() {
    let yaml = "api:\n  base_url: https://x.test/\ncache:\n  ttl_secs: 0\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/tripsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
