//! Configuration for the daemon, the launcher and the retrying client.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const SOCKET_FILE_NAME: &str = "vector_store.sock";
pub const PID_FILE_NAME: &str = "vector_store.pid";
pub const LOG_FILE_NAME: &str = "vector_store_service.log";

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   /// Directory holding the socket, PID file and daemon log. Resolved at
   /// runtime when unset.
   pub runtime_dir:     Option<PathBuf>,
   pub collection_name: String,
   pub embedding_model: String,
   pub device:          String,
   /// Store location relative to the repository root.
   pub store_dir:       PathBuf,
   pub embedding_dims:  usize,

   pub request_timeout_ms: u64,
   pub ping_timeout_ms:    u64,
   pub list_timeout_ms:    u64,
   pub bulk_timeout_ms:    u64,

   pub max_attempts:     usize,
   pub retry_delay_ms:   u64,
   pub retry_all_errors: bool,

   pub start_timeout_ms:    u64,
   pub start_settle_ms:     u64,
   pub start_ping_attempts: usize,
   pub start_ping_delay_ms: u64,
   pub stop_timeout_ms:     u64,

   pub server_read_timeout_ms: u64,
   pub metadata_timeout_ms:    u64,
   pub shutdown_grace_ms:      u64,
   pub max_connections:        usize,
   pub max_request_bytes:      usize,
   pub max_response_bytes:     usize,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         runtime_dir:            None,
         collection_name:        "repository_content".to_string(),
         embedding_model:        "all-MiniLM-L6-v2".to_string(),
         device:                 "cpu".to_string(),
         store_dir:              PathBuf::from(".vectord/vector_store"),
         embedding_dims:         384,
         request_timeout_ms:     15_000,
         ping_timeout_ms:        5_000,
         list_timeout_ms:        20_000,
         bulk_timeout_ms:        60_000,
         max_attempts:           3,
         retry_delay_ms:         1_000,
         retry_all_errors:       false,
         start_timeout_ms:       15_000,
         start_settle_ms:        2_000,
         start_ping_attempts:    3,
         start_ping_delay_ms:    1_000,
         stop_timeout_ms:        5_000,
         server_read_timeout_ms: 30_000,
         metadata_timeout_ms:    10_000,
         shutdown_grace_ms:      2_000,
         max_connections:        64,
         max_request_bytes:      16 * 1024 * 1024,
         max_response_bytes:     64 * 1024 * 1024,
      }
   }
}

impl Config {
   pub fn load() -> Self {
      Self::load_from(config_file_path())
   }

   /// Merges defaults, the TOML file at `path` (if any) and `VECTORD_*`
   /// environment variables.
   pub fn load_from(path: &Path) -> Self {
      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(path))
         .merge(Env::prefixed("VECTORD_").lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   /// Like [`Config::load_from`] but surfaces parse errors instead of falling
   /// back to defaults.
   pub fn try_load_from(path: &Path) -> Result<Self> {
      let cfg: Self = Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(path))
         .merge(Env::prefixed("VECTORD_").lowercase(true))
         .extract()
         .map_err(|e| ConfigError::Load(e.to_string()))?;
      cfg.validate()?;
      Ok(cfg)
   }

   pub fn validate(&self) -> Result<()> {
      let checks: [(&str, usize); 6] = [
         ("max_attempts", self.max_attempts),
         ("max_connections", self.max_connections),
         ("max_request_bytes", self.max_request_bytes),
         ("max_response_bytes", self.max_response_bytes),
         ("start_ping_attempts", self.start_ping_attempts),
         ("embedding_dims", self.embedding_dims),
      ];
      for (name, value) in checks {
         if value == 0 {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")).into());
         }
      }
      if self.collection_name.trim().is_empty() {
         return Err(ConfigError::Invalid("collection_name must not be empty".to_string()).into());
      }
      Ok(())
   }

   pub fn to_toml(&self) -> Result<String> {
      toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()).into())
   }

   /// Returns the runtime directory: explicit setting, then
   /// `$XDG_RUNTIME_DIR/vectord`, then `/tmp/vectord-<uid>`.
   pub fn resolve_runtime_dir(&self) -> PathBuf {
      if let Some(dir) = &self.runtime_dir {
         return dir.clone();
      }
      if let Some(xdg) = std::env::var_os("XDG_RUNTIME_DIR").filter(|v| !v.is_empty()) {
         return PathBuf::from(xdg).join("vectord");
      }
      // SAFETY: getuid has no preconditions and cannot fail.
      let uid = unsafe { libc::getuid() };
      std::env::temp_dir().join(format!("vectord-{uid}"))
   }

   pub fn store_path(&self, repo_path: &Path) -> PathBuf {
      repo_path.join(&self.store_dir)
   }

   pub const fn request_timeout(&self) -> Duration {
      Duration::from_millis(self.request_timeout_ms)
   }

   pub const fn ping_timeout(&self) -> Duration {
      Duration::from_millis(self.ping_timeout_ms)
   }

   pub const fn list_timeout(&self) -> Duration {
      Duration::from_millis(self.list_timeout_ms)
   }

   pub const fn bulk_timeout(&self) -> Duration {
      Duration::from_millis(self.bulk_timeout_ms)
   }

   pub const fn retry_delay(&self) -> Duration {
      Duration::from_millis(self.retry_delay_ms)
   }

   pub const fn start_timeout(&self) -> Duration {
      Duration::from_millis(self.start_timeout_ms)
   }

   pub const fn start_settle(&self) -> Duration {
      Duration::from_millis(self.start_settle_ms)
   }

   pub const fn start_ping_delay(&self) -> Duration {
      Duration::from_millis(self.start_ping_delay_ms)
   }

   pub const fn stop_timeout(&self) -> Duration {
      Duration::from_millis(self.stop_timeout_ms)
   }

   pub const fn server_read_timeout(&self) -> Duration {
      Duration::from_millis(self.server_read_timeout_ms)
   }

   pub const fn metadata_timeout(&self) -> Duration {
      Duration::from_millis(self.metadata_timeout_ms)
   }

   pub const fn shutdown_grace(&self) -> Duration {
      Duration::from_millis(self.shutdown_grace_ms)
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

/// Location of the user config file, `~/.config/vectord/config.toml` on Linux.
pub fn config_file_path() -> &'static PathBuf {
   static ONCE: OnceLock<PathBuf> = OnceLock::new();
   ONCE.get_or_init(|| {
      BaseDirs::new()
         .map(|d| d.config_dir().join("vectord"))
         .or_else(|| {
            std::env::var("HOME")
               .ok()
               .map(|h| PathBuf::from(h).join(".config").join("vectord"))
         })
         .unwrap_or_else(|| PathBuf::from(".vectord"))
         .join("config.toml")
   })
}

/// Writes the default configuration to `path` unless a file already exists.
pub fn write_default_config(path: &Path) -> Result<bool> {
   if path.exists() {
      return Ok(false);
   }
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   fs::write(path, Config::default().to_toml()?)?;
   Ok(true)
}
