use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is registered for (scheme + host + port)
  pub origin: String,
  pub caches: CacheNames,
  pub manifest: ManifestConfig,
  pub routing: RoutingConfig,
  pub notifications: NotificationConfig,
  /// Credentials of the push delivery provider (configuration only)
  pub push_provider: PushProviderConfig,
  pub sync: SyncConfig,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      caches: CacheNames::default(),
      manifest: ManifestConfig::default(),
      routing: RoutingConfig::default(),
      notifications: NotificationConfig::default(),
      push_provider: PushProviderConfig::default(),
      sync: SyncConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

/// Versioned names of the two stores owned by the worker.
///
/// Bumping either name makes the next activation delete the old store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheNames {
  pub precache: String,
  pub runtime: String,
}

impl Default for CacheNames {
  fn default() -> Self {
    Self {
      precache: "smart-parking-v1".to_string(),
      runtime: "runtime-cache-v1".to_string(),
    }
  }
}

impl CacheNames {
  /// Whether `name` is one of the current store names.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.precache || name == self.runtime
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManifestVariant {
  /// App shell plus the compiled script bundle and all icons
  #[default]
  Full,
  /// Reduced shell used by the combined messaging worker
  Shell,
}

const FULL_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/main.dart.js",
  "/flutter.js",
  "/flutter_bootstrap.js",
  "/manifest.json",
  "/icons/Icon-192.png",
  "/icons/Icon-512.png",
  "/icons/Icon-maskable-192.png",
  "/icons/Icon-maskable-512.png",
  "/favicon.png",
];

const SHELL_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/icons/Icon-192.png",
  "/icons/Icon-512.png",
];

impl ManifestVariant {
  pub fn paths(self) -> &'static [&'static str] {
    match self {
      Self::Full => FULL_MANIFEST,
      Self::Shell => SHELL_MANIFEST,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
  pub variant: ManifestVariant,
  /// Explicit asset list; overrides `variant` when set
  pub paths: Option<Vec<String>>,
}

impl ManifestConfig {
  /// Root-relative asset paths to precache, in order.
  pub fn entries(&self) -> Vec<String> {
    match &self.paths {
      Some(paths) => paths.clone(),
      None => self.variant.paths().iter().map(|p| p.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  /// Path fragments that mark an API/dynamic endpoint
  pub api_markers: Vec<String>,
  /// Host fragments served network-first (push provider domains)
  pub network_first_hosts: Vec<String>,
  /// Host fragments allowed through even though they are cross-origin
  pub allowed_cross_origin_hosts: Vec<String>,
  /// Host fragments that are never intercepted
  pub bypass_hosts: Vec<String>,
  /// Document served when a static asset cannot be fetched or found
  pub offline_fallback: String,
  /// Refresh cache hits from the network in the background
  pub refresh_on_hit: bool,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      api_markers: vec!["/api/".to_string()],
      network_first_hosts: vec!["firestore.googleapis.com".to_string(), "firebase".to_string()],
      allowed_cross_origin_hosts: vec!["googleapis.com".to_string(), "firebaseapp.com".to_string()],
      bypass_hosts: Vec::new(),
      offline_fallback: "/index.html".to_string(),
      refresh_on_hit: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub require_interaction: bool,
  /// Path opened when a click finds no window to focus
  pub open_path: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "Parking App".to_string(),
      default_body: "You have a new notification".to_string(),
      icon: "/icons/Icon-192.png".to_string(),
      badge: "/icons/Icon-192.png".to_string(),
      vibrate: vec![200, 100, 200],
      require_interaction: false,
      open_path: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushProviderConfig {
  pub api_key: Option<String>,
  pub auth_domain: Option<String>,
  pub project_id: Option<String>,
  pub storage_bucket: Option<String>,
  pub sender_id: Option<String>,
  pub app_id: Option<String>,
  pub measurement_id: Option<String>,
}

impl PushProviderConfig {
  /// Whether the identifiers needed to receive messages are present.
  pub fn is_configured(&self) -> bool {
    self.project_id.is_some() && self.sender_id.is_some() && self.app_id.is_some()
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that triggers a client resync
  pub tag: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-parking-data".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite file holding the named stores
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  /// Resolve the store path, falling back to the XDG data directory.
  pub fn resolve_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pwa-worker").join("caches.db"))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pwa-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pwa-worker/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
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
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("pwa-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pwa-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// The configured origin, parsed.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    config.origin_url()?;

    if config.caches.precache == config.caches.runtime {
      return Err(eyre!(
        "Precache and runtime stores must have different names (both are '{}')",
        config.caches.precache
      ));
    }

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_deployed_worker() {
    let config = Config::default();
    assert_eq!(config.caches.precache, "smart-parking-v1");
    assert_eq!(config.caches.runtime, "runtime-cache-v1");
    assert_eq!(config.notifications.default_title, "Parking App");
    assert_eq!(config.routing.offline_fallback, "/index.html");
    assert_eq!(config.manifest.entries().len(), 11);
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:8080/");
  }

  #[test]
  fn test_invalid_origin_rejected() {
    assert!(Config::from_yaml("origin: not a url").is_err());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://parking.example.com"
caches:
  precache: smart-parking-v2
manifest:
  variant: shell
"#,
    )
    .unwrap();

    assert_eq!(config.origin_url().unwrap().as_str(), "https://parking.example.com/");
    assert_eq!(config.caches.precache, "smart-parking-v2");
    assert_eq!(config.caches.runtime, "runtime-cache-v1");
    assert_eq!(config.manifest.entries(), vec![
      "/",
      "/index.html",
      "/manifest.json",
      "/icons/Icon-192.png",
      "/icons/Icon-512.png"
    ]);
  }

  #[test]
  fn test_explicit_paths_override_variant() {
    let config = Config::from_yaml("manifest:\n  variant: full\n  paths: [\"/\", \"/app.js\"]\n").unwrap();
    assert_eq!(config.manifest.entries(), vec!["/", "/app.js"]);
  }

  #[test]
  fn test_identical_store_names_rejected() {
    let result = Config::from_yaml("caches:\n  precache: same\n  runtime: same\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_is_current() {
    let names = CacheNames::default();
    assert!(names.is_current("smart-parking-v1"));
    assert!(names.is_current("runtime-cache-v1"));
    assert!(!names.is_current("smart-parking-v0"));
  }
}
