//! Background sync: a durable FIFO of mutations made while offline, drained when
//! connectivity returns.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::http::Request;
use crate::network::{Fetcher, Network};

/// Kind of queued mutation; decides the delivery endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
  Translation,
  Chat,
}

impl SyncKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Translation => "translation",
      Self::Chat => "chat",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "translation" => Some(Self::Translation),
      "chat" => Some(Self::Chat),
      _ => None,
    }
  }
}

/// Which items a sync tag drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
  All,
  Only(SyncKind),
}

impl SyncScope {
  /// Map a host sync tag to the items it covers. Unknown tags drain nothing.
  pub fn from_tag(tag: &str) -> Option<Self> {
    match tag {
      "background-translation" => Some(Self::Only(SyncKind::Translation)),
      "background-chat" => Some(Self::Only(SyncKind::Chat)),
      "background-sync" => Some(Self::All),
      _ => None,
    }
  }

  pub fn kind(&self) -> Option<SyncKind> {
    match self {
      Self::All => None,
      Self::Only(kind) => Some(*kind),
    }
  }
}

/// A queued mutation with its original request payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncItem {
  pub id: i64,
  pub kind: SyncKind,
  pub payload: Value,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Durable storage for the sync queue.
pub trait SyncStore: Send + Sync + 'static {
  fn enqueue(&self, kind: SyncKind, payload: &Value) -> Result<i64>;

  /// Live (not dead-lettered) items in FIFO order.
  fn pending(&self, kind: Option<SyncKind>) -> Result<Vec<SyncItem>>;

  /// Remove an item after confirmed delivery.
  fn complete(&self, id: i64) -> Result<()>;

  /// Count a failed attempt; `dead_letter` stops further automatic retries.
  fn record_failure(&self, id: i64, error: &str, dead_letter: bool) -> Result<()>;

  fn dead_letters(&self) -> Result<Vec<SyncItem>>;

  /// Drop items (live and dead) of the given kind, or all. Returns how many.
  fn clear(&self, kind: Option<SyncKind>) -> Result<usize>;
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub delivered: usize,
  pub retained: usize,
  pub dead_lettered: usize,
}

/// Drains the queue against the backend.
pub struct BackgroundSync<S: SyncStore, N: Network> {
  store: Arc<S>,
  fetcher: Fetcher<N>,
  origin: Url,
  translation_endpoint: String,
  chat_endpoint: String,
  max_attempts: u32,
  /// Serializes drains so one item is never in flight twice
  draining: Mutex<()>,
}

impl<S: SyncStore, N: Network> BackgroundSync<S, N> {
  pub fn new(store: Arc<S>, fetcher: Fetcher<N>, config: &Config) -> Self {
    Self {
      store,
      fetcher,
      origin: config.origin.clone(),
      translation_endpoint: config.sync.translation_endpoint.clone(),
      chat_endpoint: config.sync.chat_endpoint.clone(),
      max_attempts: config.sync.max_attempts,
      draining: Mutex::new(()),
    }
  }

  pub fn enqueue(&self, kind: SyncKind, payload: &Value) -> Result<i64> {
    let id = self.store.enqueue(kind, payload)?;
    debug!(id, kind = kind.as_str(), "Queued item for background sync");
    Ok(id)
  }

  fn endpoint(&self, kind: SyncKind) -> Result<Url> {
    let path = match kind {
      SyncKind::Translation => &self.translation_endpoint,
      SyncKind::Chat => &self.chat_endpoint,
    };
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid sync endpoint {}: {}", path, e))
  }

  /// Handle a connectivity-restored signal for `tag`.
  pub async fn run(&self, tag: &str) -> SyncReport {
    match SyncScope::from_tag(tag) {
      Some(scope) => self.drain(scope).await,
      None => {
        warn!(tag, "Ignoring unknown sync tag");
        SyncReport::default()
      }
    }
  }

  /// Attempt every live item in scope once, FIFO.
  pub async fn drain(&self, scope: SyncScope) -> SyncReport {
    let _guard = self.draining.lock().await;
    let mut report = SyncReport::default();

    let items = match self.store.pending(scope.kind()) {
      Ok(items) => items,
      Err(e) => {
        warn!(error = %e, "Could not read sync queue");
        return report;
      }
    };

    for item in items {
      match self.deliver(&item).await {
        Ok(()) => {
          if let Err(e) = self.store.complete(item.id) {
            // Delivered but still queued; the next drain resends it.
            warn!(id = item.id, error = %e, "Failed to remove delivered sync item");
            report.retained += 1;
          } else {
            report.delivered += 1;
          }
        }
        Err(e) => {
          let attempts = item.attempts + 1;
          let dead = self.max_attempts > 0 && attempts >= self.max_attempts;
          warn!(id = item.id, attempts, dead, error = %e, "Failed to sync item");
          if let Err(e) = self.store.record_failure(item.id, &e.to_string(), dead) {
            warn!(id = item.id, error = %e, "Failed to record sync failure");
          }
          if dead {
            report.dead_lettered += 1;
          } else {
            report.retained += 1;
          }
        }
      }
    }

    info!(
      delivered = report.delivered,
      retained = report.retained,
      dead_lettered = report.dead_lettered,
      "Background sync completed"
    );
    report
  }

  async fn deliver(&self, item: &SyncItem) -> Result<()> {
    let request = Request::post_json(self.endpoint(item.kind)?, &item.payload);
    let response = self.fetcher.fetch(&request).await?;
    if response.ok() {
      Ok(())
    } else {
      Err(eyre!("Server rejected sync item with status {}", response.status))
    }
  }
}
