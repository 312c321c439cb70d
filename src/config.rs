use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the web app is served from (e.g. "http://localhost:5000")
  pub origin: Url,
  /// Product name shown in notifications and the offline page
  pub app_name: String,
  /// Number the offline responses tell users to call in an emergency
  pub emergency_number: String,
  pub cache: CacheConfig,
  pub routes: RoutesConfig,
  pub install: InstallConfig,
  pub network: NetworkConfig,
  pub sync: SyncConfig,
  pub push: PushConfig,
  /// Directory for the cache database and log files
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  /// Generation token embedded in every bucket name. Bump it whenever the
  /// cached asset set or caching semantics change.
  pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  pub static_root: String,
  pub api_root: String,
  /// Same-origin path prefixes that are API calls despite living outside `api_root`
  pub api_routes: Vec<String>,
  #[serde(deserialize_with = "deserialize_lowercase_vec")]
  pub static_extensions: Vec<String>,
  /// Read endpoints whose successful responses may be cached (substring match)
  pub cacheable_api: Vec<String>,
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
  /// Critical assets pre-cached at install time; relative entries resolve against `origin`
  pub manifest: Vec<String>,
  pub concurrency: usize,
  /// Activate as soon as installation settles instead of waiting
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Delivery attempts before an item is dead-lettered; 0 retries forever
  pub max_attempts: u32,
  pub translation_endpoint: String,
  pub chat_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  pub icon: String,
  pub badge: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:5000/").expect("static origin parses"),
      app_name: "MediTranslate+".to_string(),
      emergency_number: "108".to_string(),
      cache: CacheConfig::default(),
      routes: RoutesConfig::default(),
      install: InstallConfig::default(),
      network: NetworkConfig::default(),
      sync: SyncConfig::default(),
      push: PushConfig::default(),
      data_dir: None,
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "meditranslate".to_string(),
      version: "v2.0.0".to_string(),
    }
  }
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      static_root: "/static/".to_string(),
      api_root: "/api/".to_string(),
      api_routes: strings(&["/translate", "/chat", "/get_settings", "/scan_prescription"]),
      static_extensions: strings(&[".css", ".js", ".json", ".woff", ".woff2", ".ttf", ".eot"]),
      cacheable_api: strings(&["/api/offline-status", "/get_settings"]),
    }
  }
}

impl Default for InstallConfig {
  fn default() -> Self {
    Self {
      manifest: strings(&[
        "/",
        "/translator",
        "/chatbot",
        "/prescription",
        "/reminders",
        "/static/css/style.css",
        "/static/js/app.js",
        "/static/js/translator.js",
        "/static/js/chatbot.js",
        "/static/js/prescription.js",
        "/static/js/reminders.js",
        "/static/manifest.json",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
      ]),
      concurrency: 4,
      skip_waiting: true,
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 15 }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      translation_endpoint: "/api/translate".to_string(),
      chat_endpoint: "/api/chat".to_string(),
    }
  }
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      icon: "/static/icon-192.png".to_string(),
      badge: "/static/badge-72.png".to_string(),
    }
  }
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./meditranslate-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/meditranslate-sw/config.yaml
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
    let local = PathBuf::from("meditranslate-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("meditranslate-sw").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be an http(s) URL, got {}", self.origin));
    }
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if self.install.concurrency == 0 {
      return Err(eyre!("install.concurrency must be at least 1"));
    }
    Ok(())
  }

  /// Directory holding the cache database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("meditranslate-sw"))
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.network.timeout_secs)
  }

  /// Token identifying the current cache generation, e.g. "meditranslate-v2.0.0".
  pub fn version_token(&self) -> String {
    format!("{}-{}", self.cache.prefix, self.cache.version)
  }

  pub fn buckets(&self) -> BucketNames {
    let bucket = |role: &str| format!("{}-{}-{}", self.cache.prefix, role, self.cache.version);
    BucketNames {
      static_assets: bucket("static"),
      api: bucket("api"),
      images: bucket("images"),
    }
  }
}

/// Names of the current-generation bucket for each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
  pub static_assets: String,
  pub api: String,
  pub images: String,
}

impl BucketNames {
  /// Buckets that survive activation; everything else is pruned.
  pub fn keep(&self) -> [&str; 3] {
    [&self.static_assets, &self.api, &self.images]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.version_token(), "meditranslate-v2.0.0");
  }

  #[test]
  fn test_bucket_names_embed_version() {
    let config = Config::default();
    let buckets = config.buckets();
    assert_eq!(buckets.static_assets, "meditranslate-static-v2.0.0");
    assert_eq!(buckets.api, "meditranslate-api-v2.0.0");
    assert_eq!(buckets.images, "meditranslate-images-v2.0.0");
    assert!(buckets.keep().iter().all(|b| b.ends_with("-v2.0.0")));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://meditranslate.example"
cache:
  version: v3
routes:
  static_extensions: [".CSS", ".Js"]
"#,
    )
    .unwrap();

    assert_eq!(config.origin.as_str(), "https://meditranslate.example/");
    assert_eq!(config.cache.prefix, "meditranslate");
    assert_eq!(config.buckets().api, "meditranslate-api-v3");
    assert_eq!(config.routes.static_extensions, vec![".css", ".js"]);
    assert_eq!(config.routes.api_root, "/api/");
  }

  #[test]
  fn test_rejects_non_http_origin() {
    assert!(Config::from_yaml("origin: \"file:///tmp/app\"").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/meditranslate-sw.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
