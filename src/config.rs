use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Custom title for header (defaults to "recdash")
  pub title: Option<String>,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_bind")]
  pub bind: String,
  /// Record database file (defaults to <data dir>/recdash/records.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub users: Vec<UserConfig>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: default_bind(),
      database: None,
      cache: CacheConfig::default(),
      users: Vec::new(),
    }
  }
}

fn default_bind() -> String {
  "127.0.0.1:8787".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// In-process map, lost on restart
  #[default]
  Memory,
  /// Entries kept in the SQLite cache file
  Sqlite,
  /// Every read goes to the record store
  None,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
  /// Per-key async mutex, single gateway process
  #[default]
  Memory,
  /// Lease rows in the SQLite cache file, shared by gateway processes
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  #[serde(default)]
  pub lock: LockBackend,
  #[serde(default = "default_lock_timeout_secs")]
  pub lock_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      ttl_secs: default_ttl_secs(),
      lock: LockBackend::default(),
      lock_timeout_secs: default_lock_timeout_secs(),
    }
  }
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_lock_timeout_secs() -> u64 {
  30
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn lock_timeout(&self) -> Duration {
    Duration::from_secs(self.lock_timeout_secs)
  }
}

/// A person allowed to sign in.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
  pub name: String,
  pub role: String,
  pub email: Option<String>,
  /// Lowercase hex SHA-256 of the user's access code
  pub access_code_sha256: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  #[serde(default = "default_url")]
  pub url: String,
  #[serde(default = "default_role")]
  pub role: String,
  /// How long a terminal sync status stays visible
  #[serde(default = "default_revert_delay_secs")]
  pub revert_delay_secs: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      role: default_role(),
      revert_delay_secs: default_revert_delay_secs(),
    }
  }
}

fn default_url() -> String {
  "http://127.0.0.1:8787".to_string()
}

fn default_role() -> String {
  "agent".to_string()
}

fn default_revert_delay_secs() -> u64 {
  4
}

impl ClientConfig {
  pub fn revert_delay(&self) -> Duration {
    Duration::from_secs(self.revert_delay_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recdash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recdash/config.yaml
  ///
  /// With no file anywhere, built-in defaults are used.
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
    let local = PathBuf::from("recdash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recdash").join("config.yaml");
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

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  pub fn title(&self) -> &str {
    self.title.as_deref().unwrap_or("recdash")
  }

  /// Where the record database lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.server.database {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("records.db")),
    }
  }

  /// Get the access code from environment variables.
  ///
  /// Checks RECDASH_ACCESS_CODE first, then ACCESS_CODE as fallback.
  pub fn get_access_code() -> Result<String> {
    std::env::var("RECDASH_ACCESS_CODE")
      .or_else(|_| std::env::var("ACCESS_CODE"))
      .map_err(|_| {
        eyre!("Access code not found. Set RECDASH_ACCESS_CODE or ACCESS_CODE environment variable.")
      })
  }
}

/// Per-user data directory: database, cache file and client logs.
pub fn data_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("recdash"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}
