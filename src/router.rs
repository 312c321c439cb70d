//! Top-level fetch pipeline: classify, run the matching strategy, and fall back
//! to cache and offline synthesis so every request resolves to a response.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{BucketStore, Strategies, StoredEntry};
use crate::classify::{Classifier, RequestClass};
use crate::config::{BucketNames, Config};
use crate::http::{cache_key, Request, Response};
use crate::messages::TranslationRecord;
use crate::network::{Fetcher, Network};
use crate::offline::OfflineResponder;

pub struct Router<S: BucketStore, N: Network> {
  engine: Strategies<S, N>,
  classifier: Classifier,
  offline: OfflineResponder,
  buckets: BucketNames,
  root: Url,
}

/// Fields of a translate call used to key the translation cache.
#[derive(Deserialize)]
struct TranslationQuery {
  text: String,
  source_lang: String,
  target_lang: String,
}

impl<S: BucketStore, N: Network> Router<S, N> {
  pub fn new(store: Arc<S>, network: Arc<N>, config: &Config) -> Self {
    let offline = OfflineResponder::new(config);
    let engine = Strategies::new(
      store,
      Fetcher::new(network, config.fetch_timeout()),
      offline.clone(),
      config.routes.cacheable_api.clone(),
    );

    let mut root = config.origin.clone();
    root.set_path("/");
    root.set_query(None);

    Self {
      engine,
      classifier: Classifier::new(&config.origin, &config.routes),
      offline,
      buckets: config.buckets(),
      root,
    }
  }

  pub fn engine(&self) -> &Strategies<S, N> {
    &self.engine
  }

  pub fn buckets(&self) -> &BucketNames {
    &self.buckets
  }

  pub fn root(&self) -> &Url {
    &self.root
  }

  /// Handle a request from a controlled client. Never fails.
  pub async fn handle(&self, request: &Request) -> Response {
    if !request.is_get() {
      return self.forward(request).await;
    }

    let class = self.classifier.classify(request);
    debug!(url = %request.url, class = class.as_str(), "Routing request");

    let buckets = &self.buckets;
    let result = match class {
      RequestClass::Static => self.engine.cache_first(request, &buckets.static_assets).await,
      RequestClass::Image => self.engine.cache_first(request, &buckets.images).await,
      RequestClass::Api => self.engine.network_first_api(request, &buckets.api).await,
      RequestClass::Navigation => {
        self
          .engine
          .network_first_navigation(request, &buckets.static_assets, &self.root)
          .await
      }
      RequestClass::CrossOrigin => {
        self
          .engine
          .stale_while_revalidate(request, &buckets.static_assets)
          .await
      }
      RequestClass::Other => self.engine.passthrough(request).await,
    };

    match result {
      Ok(response) => response,
      Err(e) => {
        info!(url = %request.url, class = class.as_str(), error = %e, "Request failed, using offline fallback");
        self.fallback(request)
      }
    }
  }

  pub async fn serve(&self, request: &Request, controlled: bool) -> Response {
    if controlled {
      self.handle(request).await
    } else {
      self.handle_uncontrolled(request).await
    }
  }

  /// Like [`Router::serve`], but resolves through the offline fallback as soon
  /// as the host signals `abort`. A dropped abort sender never aborts.
  pub async fn serve_abortable(
    &self,
    request: &Request,
    controlled: bool,
    abort: oneshot::Receiver<()>,
  ) -> Response {
    tokio::select! {
      response = self.serve(request, controlled) => response,
      Ok(()) = abort => {
        info!(url = %request.url, "Fetch aborted by host");
        self.fallback(request)
      }
    }
  }

  /// Requests from clients this generation does not control go straight to the
  /// network; failures still resolve to an offline response.
  pub async fn handle_uncontrolled(&self, request: &Request) -> Response {
    match self.engine.passthrough(request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(url = %request.url, error = %e, "Uncontrolled fetch failed");
        self.fallback(request)
      }
    }
  }

  /// Non-GET requests bypass the strategies.
  async fn forward(&self, request: &Request) -> Response {
    match self.engine.passthrough(request).await {
      Ok(response) => response,
      Err(e) => {
        info!(method = %request.method, url = %request.url, error = %e, "Mutation failed offline");
        if request.url.path().contains("/translate") {
          if let Some(cached) = self.translation_for_request(request) {
            return cached;
          }
        }
        self.fallback(request)
      }
    }
  }

  /// Terminal fallback: any current bucket holding the request, then the cached
  /// site root for page loads, else synthesis.
  pub fn fallback(&self, request: &Request) -> Response {
    let key = request.cache_key();
    for bucket in self.buckets.keep() {
      if let Some(cached) = self.engine.lookup(bucket, &key) {
        return cached;
      }
    }

    let class = self.classifier.classify(request);
    if class == RequestClass::Navigation && request.is_get() {
      let root_key = cache_key(&request.method, &self.root);
      if let Some(home) = self.engine.lookup(&self.buckets.static_assets, &root_key) {
        return home;
      }
    }
    self.offline.for_class(class, &request.url)
  }

  fn translation_url(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<Url> {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    let key = format!("translation_{}_{}_{}", source_lang, target_lang, &digest[..16]);
    self
      .root
      .join(&format!("cached-translation/{}", key))
      .map_err(|e| eyre!("Invalid translation cache key {}: {}", key, e))
  }

  /// Store a translation so offline translate calls for the same text and
  /// language pair can be answered.
  pub fn cache_translation(&self, record: &TranslationRecord) -> Result<()> {
    let url = self.translation_url(&record.text, &record.source_lang, &record.target_lang)?;
    let response = Response::json(
      200,
      &json!({
        "success": true,
        "translated_text": record.translated_text,
        "source_lang": record.source_lang,
        "target_lang": record.target_lang,
      }),
    );

    self
      .engine
      .store()
      .put(
        &self.buckets.api,
        &StoredEntry::capture(Request::get(url).cache_key(), &response),
      )
      .map_err(|e| eyre!("Failed to cache translation: {}", e))?;

    debug!(
      source_lang = %record.source_lang,
      target_lang = %record.target_lang,
      "Translation cached"
    );
    Ok(())
  }

  pub fn cached_translation(
    &self,
    text: &str,
    source_lang: &str,
    target_lang: &str,
  ) -> Option<Response> {
    let url = self.translation_url(text, source_lang, target_lang).ok()?;
    self
      .engine
      .lookup(&self.buckets.api, &Request::get(url).cache_key())
  }

  fn translation_for_request(&self, request: &Request) -> Option<Response> {
    let body = request.body.as_deref()?;
    match serde_json::from_slice::<TranslationQuery>(body) {
      Ok(query) => self.cached_translation(&query.text, &query.source_lang, &query.target_lang),
      Err(e) => {
        warn!(error = %e, "Translate body is not a translation query");
        None
      }
    }
  }
}
