//! Strategy engine: the caching algorithms that sit between the router and the network.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use super::traits::{BucketStore, StoredEntry};
use crate::http::{cache_key, Request, Response};
use crate::network::{Fetcher, Network};
use crate::offline::OfflineResponder;

/// Caching strategies over a bucket store and a network.
///
/// Store reads that fail are treated as misses and store writes that fail are
/// dropped, so a broken store degrades to plain network behaviour.
pub struct Strategies<S: BucketStore, N: Network> {
  store: Arc<S>,
  fetcher: Fetcher<N>,
  offline: OfflineResponder,
  /// Read endpoints whose responses may be persisted (substring match on path)
  cacheable_api: Arc<Vec<String>>,
  /// Background refreshes still in flight
  revalidations: Arc<Mutex<JoinSet<()>>>,
}

impl<S: BucketStore, N: Network> Strategies<S, N> {
  pub fn new(
    store: Arc<S>,
    fetcher: Fetcher<N>,
    offline: OfflineResponder,
    cacheable_api: Vec<String>,
  ) -> Self {
    Self {
      store,
      fetcher,
      offline,
      cacheable_api: Arc::new(cacheable_api),
      revalidations: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Look up a stored entry, treating store errors as a miss.
  pub fn lookup(&self, bucket: &str, key: &str) -> Option<Response> {
    match self.store.match_entry(bucket, key) {
      Ok(entry) => entry.map(StoredEntry::into_response),
      Err(e) => {
        warn!(bucket, key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Persist a response copy; failures are logged and swallowed.
  pub fn remember(&self, bucket: &str, key: &str, response: &Response) {
    if let Err(e) = self.store.put(bucket, &StoredEntry::capture(key, response)) {
      warn!(bucket, key, error = %e, "Cache write failed");
    }
  }

  /// Serve from cache if present, otherwise fetch and store 2xx responses.
  ///
  /// Network failure without a cached entry is returned as an error.
  pub async fn cache_first(&self, request: &Request, bucket: &str) -> Result<Response> {
    let key = request.cache_key();
    if let Some(cached) = self.lookup(bucket, &key) {
      debug!(bucket, url = %request.url, "Cache hit");
      return Ok(cached);
    }

    let response = self.fetcher.fetch(request).await?;
    if response.ok() {
      self.remember(bucket, &key, &response);
    }
    Ok(response)
  }

  /// Network first; only allow-listed read endpoints are persisted.
  ///
  /// On network failure: stored entry, else the offline API contract.
  pub async fn network_first_api(&self, request: &Request, bucket: &str) -> Result<Response> {
    let key = request.cache_key();
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() && self.is_cacheable_api(&request.url) {
          self.remember(bucket, &key, &response);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed for API, trying cache");
        Ok(
          self
            .lookup(bucket, &key)
            .unwrap_or_else(|| self.offline.api(&request.url)),
        )
      }
    }
  }

  /// Network first for page loads.
  ///
  /// On network failure: exact cached page, then the cached site root, then the
  /// offline page.
  pub async fn network_first_navigation(
    &self,
    request: &Request,
    bucket: &str,
    root: &Url,
  ) -> Result<Response> {
    let key = request.cache_key();
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.remember(bucket, &key, &response);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed for navigation, trying cache");
        let root_key = cache_key(&request.method, root);
        Ok(
          self
            .lookup(bucket, &key)
            .or_else(|| self.lookup(bucket, &root_key))
            .unwrap_or_else(|| self.offline.navigation()),
        )
      }
    }
  }

  /// Serve the cached copy immediately and refresh it in the background.
  ///
  /// With nothing cached the caller waits for the network.
  pub async fn stale_while_revalidate(&self, request: &Request, bucket: &str) -> Result<Response> {
    let key = request.cache_key();
    match self.lookup(bucket, &key) {
      Some(cached) => {
        let revalidate = self.clone();
        let request = request.clone();
        let bucket = bucket.to_string();
        {
          let mut tasks = self
            .revalidations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
          while tasks.try_join_next().is_some() {}
          tasks.spawn(async move {
            if let Err(e) = revalidate.refresh(&request, &bucket).await {
              debug!(url = %request.url, error = %e, "Background revalidation failed");
            }
          });
        }
        Ok(cached)
      }
      None => self.refresh(request, bucket).await,
    }
  }

  /// Wait for every background refresh started so far.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(
      &mut *self
        .revalidations
        .lock()
        .unwrap_or_else(PoisonError::into_inner),
    );
    if !pending.is_empty() {
      debug!(count = pending.len(), "Waiting for background revalidations");
    }
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Background revalidation task failed");
      }
    }
  }

  async fn refresh(&self, request: &Request, bucket: &str) -> Result<Response> {
    let response = self.fetcher.fetch(request).await?;
    if response.ok() {
      self.remember(bucket, &request.cache_key(), &response);
    }
    Ok(response)
  }

  /// Straight to network, no caching in either direction.
  pub async fn passthrough(&self, request: &Request) -> Result<Response> {
    self.fetcher.fetch(request).await
  }

  /// Fetch and store one asset for install-time pre-population. Non-2xx is a failure.
  pub async fn precache(&self, request: &Request, bucket: &str) -> Result<()> {
    let response = self.fetcher.fetch(request).await?;
    if !response.ok() {
      return Err(eyre!(
        "Precache of {} returned status {}",
        request.url,
        response.status
      ));
    }
    self
      .store
      .put(bucket, &StoredEntry::capture(request.cache_key(), &response))
  }

  fn is_cacheable_api(&self, url: &Url) -> bool {
    let path = url.path();
    self
      .cacheable_api
      .iter()
      .any(|endpoint| path.contains(endpoint.as_str()))
  }
}

impl<S: BucketStore, N: Network> Clone for Strategies<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: self.fetcher.clone(),
      offline: self.offline.clone(),
      cacheable_api: Arc::clone(&self.cacheable_api),
      revalidations: Arc::clone(&self.revalidations),
    }
  }
}
