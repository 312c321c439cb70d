//! The outbound network seam.
//!
//! Everything that leaves the worker goes through [`Network`], so the router,
//! installer and sync queue can be exercised against scripted networks in tests.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::http::{Headers, Request, Response, ResponseSource};

/// Something that can perform a real fetch.
///
/// An `Err` means the network could not produce a response at all
/// (unreachable, reset, aborted). HTTP error statuses are `Ok`.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("meditranslate-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = Headers::from(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      source: ResponseSource::Network,
    })
  }
}

/// A network that is never reachable. Used for `--offline`.
#[derive(Clone, Copy, Default)]
pub struct Disconnected;

impl Network for Disconnected {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unreachable: {}", request.url))
  }
}

/// Network chosen by the host at startup.
#[derive(Clone)]
pub enum HostNetwork {
  Http(HttpNetwork),
  Disconnected(Disconnected),
}

impl Network for HostNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    match self {
      Self::Http(network) => network.fetch(request).await,
      Self::Disconnected(network) => network.fetch(request).await,
    }
  }
}

/// Shared handle that bounds every fetch by a timeout.
pub struct Fetcher<N: Network> {
  network: Arc<N>,
  timeout: Duration,
}

impl<N: Network> Fetcher<N> {
  pub fn new(network: Arc<N>, timeout: Duration) -> Self {
    Self { network, timeout }
  }

  pub async fn fetch(&self, request: &Request) -> Result<Response> {
    match tokio::time::timeout(self.timeout, self.network.fetch(request)).await {
      Ok(result) => result,
      Err(_) => Err(eyre!(
        "Fetch of {} timed out after {:?}",
        request.url,
        self.timeout
      )),
    }
  }
}

impl<N: Network> Clone for Fetcher<N> {
  fn clone(&self) -> Self {
    Self {
      network: Arc::clone(&self.network),
      timeout: self.timeout,
    }
  }
}
