//! Install/activate lifecycle of one cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{BucketStore, Strategies};
use crate::clients::ClientRegistry;
use crate::config::{BucketNames, Config};
use crate::http::Request;
use crate::network::Network;

const ACTIVE_VERSION_KEY: &str = "active_version";
const WAITING_VERSION_KEY: &str = "waiting_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  Idle,
  Installing,
  Waiting,
  Activating,
  Controlling,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Idle => "idle",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Controlling => "controlling",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAsset {
  pub url: String,
  pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivateReport {
  pub version: String,
  pub deleted: Vec<String>,
  pub claimed: usize,
}

pub struct Lifecycle {
  state: WorkerState,
  version: String,
  origin: Url,
  manifest: Vec<String>,
  concurrency: usize,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn new(config: &Config) -> Self {
    Self {
      state: WorkerState::Idle,
      version: config.version_token(),
      origin: config.origin.clone(),
      manifest: config.install.manifest.clone(),
      concurrency: config.install.concurrency.max(1),
      skip_waiting: config.install.skip_waiting,
    }
  }

  /// Pick up where an earlier run against `store` left off: `Controlling` if
  /// this generation was activated, `Waiting` if it was only installed.
  pub fn resume<S: BucketStore>(config: &Config, store: &S) -> Self {
    let mut lifecycle = Self::new(config);
    match store.get_meta(ACTIVE_VERSION_KEY) {
      Ok(Some(active)) if active == lifecycle.version => {
        info!(version = %active, "Resuming active generation");
        lifecycle.state = WorkerState::Controlling;
        return lifecycle;
      }
      Ok(Some(active)) => {
        info!(active = %active, configured = %lifecycle.version, "Stored generation is outdated");
      }
      Ok(None) => debug!("No active generation recorded"),
      Err(e) => warn!(error = %e, "Could not read active generation"),
    }

    match store.get_meta(WAITING_VERSION_KEY) {
      Ok(Some(waiting)) if waiting == lifecycle.version => {
        info!(version = %waiting, "Resuming installed generation");
        lifecycle.state = WorkerState::Waiting;
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Could not read installed generation"),
    }
    lifecycle
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn is_controlling(&self) -> bool {
    self.state == WorkerState::Controlling
  }

  /// Record a skip-waiting request. Returns true if activation should run now.
  pub fn request_skip_waiting(&mut self) -> bool {
    self.skip_waiting = true;
    self.state == WorkerState::Waiting
  }

  /// Whether activation should follow a finished install without waiting.
  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting
  }

  /// Pre-populate the static bucket from the manifest.
  ///
  /// Individual asset failures are reported, never fatal. A new generation ends
  /// in `Waiting`; reinstalling the controlling one only refreshes its assets.
  pub async fn install<S: BucketStore, N: Network>(
    &mut self,
    engine: &Strategies<S, N>,
    buckets: &BucketNames,
  ) -> Result<InstallReport> {
    match self.state {
      WorkerState::Installing | WorkerState::Activating => {
        return Err(eyre!("Cannot install while {}", self.state));
      }
      _ => {}
    }

    let reinstall = self.state == WorkerState::Controlling;
    if !reinstall {
      self.state = WorkerState::Installing;
    }
    info!(version = %self.version, assets = self.manifest.len(), reinstall, "Installing");

    for bucket in buckets.keep() {
      if let Err(e) = engine.store().open_bucket(bucket) {
        warn!(bucket, error = %e, "Failed to open bucket");
      }
    }

    let mut report = InstallReport::default();
    let mut requests = Vec::with_capacity(self.manifest.len());
    for entry in &self.manifest {
      match self.origin.join(entry) {
        Ok(url) => requests.push(Request::get(url)),
        Err(e) => report.failed.push(FailedAsset {
          url: entry.clone(),
          error: format!("Invalid asset URL: {}", e),
        }),
      }
    }

    let bucket = buckets.static_assets.as_str();
    let results: Vec<_> = stream::iter(requests)
      .map(|request| async move {
        let outcome = engine.precache(&request, bucket).await;
        (request.url, outcome)
      })
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    for (url, outcome) in results {
      match outcome {
        Ok(()) => report.cached.push(url.to_string()),
        Err(e) => {
          warn!(url = %url, error = %e, "Failed to precache asset");
          report.failed.push(FailedAsset {
            url: url.to_string(),
            error: e.to_string(),
          });
        }
      }
    }
    report.cached.sort();

    if !reinstall {
      if let Err(e) = engine.store().set_meta(WAITING_VERSION_KEY, &self.version) {
        warn!(error = %e, "Failed to record installed generation");
      }
      self.state = WorkerState::Waiting;
    }
    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "Install complete"
    );
    Ok(report)
  }

  /// Prune old generations, record this one as active and claim every client.
  ///
  /// Only valid from `Waiting`. A failure leaves the lifecycle in `Waiting` so
  /// activation can be retried.
  pub fn activate<S: BucketStore>(
    &mut self,
    store: &S,
    buckets: &BucketNames,
    clients: &mut ClientRegistry,
  ) -> Result<ActivateReport> {
    if self.state != WorkerState::Waiting {
      return Err(eyre!("Cannot activate from state {}", self.state));
    }

    self.state = WorkerState::Activating;
    match self.prune_and_record(store, buckets) {
      Ok(deleted) => {
        let claimed = clients.claim();
        self.state = WorkerState::Controlling;
        info!(version = %self.version, deleted = deleted.len(), claimed, "Activated");
        Ok(ActivateReport {
          version: self.version.clone(),
          deleted,
          claimed,
        })
      }
      Err(e) => {
        self.state = WorkerState::Waiting;
        Err(e)
      }
    }
  }

  fn prune_and_record<S: BucketStore>(&self, store: &S, buckets: &BucketNames) -> Result<Vec<String>> {
    let keep = buckets.keep();
    let mut deleted = Vec::new();

    for name in store.bucket_names()? {
      if keep.contains(&name.as_str()) {
        continue;
      }
      if store.delete_bucket(&name)? {
        debug!(bucket = %name, "Deleted old bucket");
        deleted.push(name);
      }
    }

    store.set_meta(ACTIVE_VERSION_KEY, &self.version)?;
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{SqliteStore, StoredEntry};
  use crate::http::{Response, ResponseSource};
  use crate::network::mock::MockNetwork;
  use crate::network::Fetcher;
  use crate::offline::OfflineResponder;
  use crate::testing::FailingStore;
  use std::sync::Arc;
  use std::time::Duration;

  fn config(manifest: &[&str]) -> Config {
    let mut config = Config::default();
    config.origin = Url::parse("https://app.example/").unwrap();
    config.install.manifest = manifest.iter().map(|s| s.to_string()).collect();
    config
  }

  fn engine<S: BucketStore>(store: Arc<S>, network: Arc<MockNetwork>, config: &Config) -> Strategies<S, MockNetwork> {
    Strategies::new(
      store,
      Fetcher::new(network, Duration::from_secs(1)),
      OfflineResponder::new(config),
      config.routes.cacheable_api.clone(),
    )
  }

  #[tokio::test]
  async fn test_partial_install_still_completes() {
    let config = config(&["/", "/style.css"]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("https://app.example/", 200, "<html>home</html>");
    network.fail("https://app.example/style.css");

    let engine = engine(Arc::clone(&store), network, &config);
    let buckets = config.buckets();
    let mut lifecycle = Lifecycle::new(&config);

    let report = lifecycle.install(&engine, &buckets).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Waiting);
    assert_eq!(report.cached, vec!["https://app.example/"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].url, "https://app.example/style.css");

    assert_eq!(
      store.keys(&buckets.static_assets).unwrap(),
      vec!["GET https://app.example/"]
    );
    // Every current bucket exists after install.
    assert_eq!(store.bucket_names().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_install_non_2xx_counts_as_failure() {
    let config = config(&["/manifest.json"]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("https://app.example/manifest.json", 404, "missing");

    let engine = engine(Arc::clone(&store), network, &config);
    let mut lifecycle = Lifecycle::new(&config);
    let report = lifecycle.install(&engine, &config.buckets()).await.unwrap();
    assert!(report.cached.is_empty());
    assert_eq!(report.failed.len(), 1);
  }

  #[tokio::test]
  async fn test_activate_prunes_old_generations() {
    let mut old = config(&[]);
    old.cache.version = "v1.0.0".to_string();
    let new = config(&[]);

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let entry = StoredEntry::capture(
      "GET https://app.example/",
      &Response::new(200, b"old".to_vec(), ResponseSource::Network),
    );
    for bucket in old.buckets().keep() {
      store.put(bucket, &entry).unwrap();
    }
    store.open_bucket("unrelated-cache").unwrap();

    let network = Arc::new(MockNetwork::new());
    let engine = engine(Arc::clone(&store), network, &new);
    let buckets = new.buckets();
    let mut clients = ClientRegistry::new();
    clients.connect(Url::parse("https://app.example/").unwrap(), false);

    let mut lifecycle = Lifecycle::new(&new);
    lifecycle.install(&engine, &buckets).await.unwrap();
    let report = lifecycle.activate(store.as_ref(), &buckets, &mut clients).unwrap();

    assert_eq!(lifecycle.state(), WorkerState::Controlling);
    assert_eq!(report.deleted.len(), 4);
    assert_eq!(report.claimed, 1);

    let mut remaining = store.bucket_names().unwrap();
    remaining.sort();
    let mut expected: Vec<String> = buckets.keep().iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(remaining, expected);
    assert!(remaining.iter().all(|name| !name.contains("v1.0.0")));
  }

  #[tokio::test]
  async fn test_activate_requires_waiting() {
    let config = config(&[]);
    let store = SqliteStore::open_in_memory().unwrap();
    let mut lifecycle = Lifecycle::new(&config);
    let err = lifecycle
      .activate(&store, &config.buckets(), &mut ClientRegistry::new())
      .unwrap_err();
    assert!(err.to_string().contains("idle"));
    assert_eq!(lifecycle.state(), WorkerState::Idle);
  }

  #[tokio::test]
  async fn test_failed_activation_can_be_retried() {
    let config = config(&[]);
    let engine = engine(Arc::new(FailingStore), Arc::new(MockNetwork::new()), &config);
    let buckets = config.buckets();
    let mut lifecycle = Lifecycle::new(&config);

    lifecycle.install(&engine, &buckets).await.unwrap();
    assert!(lifecycle
      .activate(&FailingStore, &buckets, &mut ClientRegistry::new())
      .is_err());
    assert_eq!(lifecycle.state(), WorkerState::Waiting);
  }

  #[tokio::test]
  async fn test_resume_after_activation() {
    let config = config(&[]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    assert_eq!(Lifecycle::resume(&config, store.as_ref()).state(), WorkerState::Idle);

    let engine = engine(Arc::clone(&store), Arc::new(MockNetwork::new()), &config);
    let mut lifecycle = Lifecycle::new(&config);
    lifecycle.install(&engine, &config.buckets()).await.unwrap();
    lifecycle
      .activate(store.as_ref(), &config.buckets(), &mut ClientRegistry::new())
      .unwrap();

    assert!(Lifecycle::resume(&config, store.as_ref()).is_controlling());

    let mut bumped = config.clone();
    bumped.cache.version = "v2.1.0".to_string();
    assert_eq!(Lifecycle::resume(&bumped, store.as_ref()).state(), WorkerState::Idle);
  }

  #[tokio::test]
  async fn test_installed_generation_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = config(&["/"]);
    let network = Arc::new(MockNetwork::new());
    network.respond("https://app.example/", 200, "<html>home</html>");

    {
      let store = Arc::new(SqliteStore::open(&path).unwrap());
      let engine = engine(Arc::clone(&store), Arc::clone(&network), &config);
      let mut lifecycle = Lifecycle::resume(&config, store.as_ref());
      lifecycle.install(&engine, &config.buckets()).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let mut lifecycle = Lifecycle::resume(&config, &store);
    assert_eq!(lifecycle.state(), WorkerState::Waiting);

    lifecycle
      .activate(&store, &config.buckets(), &mut ClientRegistry::new())
      .unwrap();
    drop(store);

    let store = SqliteStore::open(&path).unwrap();
    assert!(Lifecycle::resume(&config, &store).is_controlling());
  }

  #[tokio::test]
  async fn test_reinstall_keeps_control() {
    let config = config(&["/"]);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("https://app.example/", 200, "<html>v1</html>");
    let engine = engine(Arc::clone(&store), Arc::clone(&network), &config);
    let buckets = config.buckets();

    let mut lifecycle = Lifecycle::new(&config);
    lifecycle.install(&engine, &buckets).await.unwrap();
    lifecycle
      .activate(store.as_ref(), &buckets, &mut ClientRegistry::new())
      .unwrap();

    network.respond("https://app.example/", 200, "<html>v2</html>");
    let report = lifecycle.install(&engine, &buckets).await.unwrap();
    assert_eq!(report.cached, vec!["https://app.example/"]);
    assert!(lifecycle.is_controlling());

    let home = store
      .match_entry(&buckets.static_assets, "GET https://app.example/")
      .unwrap()
      .unwrap();
    assert_eq!(home.body, b"<html>v2</html>");
  }

  #[test]
  fn test_skip_waiting_request() {
    let mut config = config(&[]);
    config.install.skip_waiting = false;
    let mut lifecycle = Lifecycle::new(&config);
    assert!(!lifecycle.skips_waiting());
    assert!(!lifecycle.request_skip_waiting());
    assert!(lifecycle.skips_waiting());
  }
}
