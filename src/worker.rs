//! The worker event loop.
//!
//! The host talks to the worker only through [`WorkerHandle`], which turns calls
//! into [`WorkerEvent`]s on an unbounded channel. Fetches run as independent
//! tasks; install, activate and cache clearing run inline so they never overlap.
//! Anything the host has to act on (notifications, focusing windows) comes back
//! as a [`HostEvent`].

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::BucketStore;
use crate::clients::{Client, ClientRegistry};
use crate::config::Config;
use crate::http::{Request, Response};
use crate::lifecycle::{ActivateReport, InstallReport, Lifecycle, WorkerState};
use crate::messages::ControlMessage;
use crate::network::{Fetcher, Network};
use crate::push::{self, ClickIntent, Notification};
use crate::router::Router;
use crate::sync::{BackgroundSync, SyncReport, SyncStore};

/// Events delivered to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<InstallReport>>,
  },
  Activate {
    reply: oneshot::Sender<Result<ActivateReport>>,
  },
  Fetch {
    request: Request,
    /// Issuing client, if the host knows it
    client_id: Option<String>,
    abort: Option<oneshot::Receiver<()>>,
    reply: oneshot::Sender<Response>,
  },
  Message {
    data: Value,
    reply: oneshot::Sender<Option<Value>>,
  },
  Sync {
    tag: String,
    reply: oneshot::Sender<SyncReport>,
  },
  Push {
    payload: Vec<u8>,
  },
  NotificationClick {
    action: Option<String>,
    data: Value,
  },
  ClientConnected {
    url: Url,
    reply: oneshot::Sender<Client>,
  },
  State {
    reply: oneshot::Sender<WorkerState>,
  },
}

/// Events the host must act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
  ShowNotification(Notification),
  ClientsClaimed { count: usize },
  FocusClient(Client),
  OpenWindow { url: Url },
}

pub struct Worker<S: BucketStore + SyncStore, N: Network> {
  router: Arc<Router<S, N>>,
  sync: Arc<BackgroundSync<S, N>>,
  store: Arc<S>,
  lifecycle: Lifecycle,
  clients: ClientRegistry,
  config: Arc<Config>,
  host: mpsc::UnboundedSender<HostEvent>,
}

impl<S: BucketStore + SyncStore, N: Network> Worker<S, N> {
  /// Start the worker loop. It runs until every handle is dropped.
  pub fn spawn(
    config: Config,
    store: Arc<S>,
    network: Arc<N>,
  ) -> (WorkerHandle, mpsc::UnboundedReceiver<HostEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (host_tx, host_rx) = mpsc::unbounded_channel();

    let router = Router::new(Arc::clone(&store), Arc::clone(&network), &config);
    let sync = BackgroundSync::new(
      Arc::clone(&store),
      Fetcher::new(network, config.fetch_timeout()),
      &config,
    );
    let lifecycle = Lifecycle::resume(&config, store.as_ref());

    let worker = Self {
      router: Arc::new(router),
      sync: Arc::new(sync),
      store,
      lifecycle,
      clients: ClientRegistry::new(),
      config: Arc::new(config),
      host: host_tx,
    };
    tokio::spawn(worker.run(rx));

    (WorkerHandle { tx }, host_rx)
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    info!(version = %self.lifecycle.version(), state = %self.lifecycle.state(), "Worker started");
    while let Some(event) = rx.recv().await {
      self.dispatch(event).await;
    }
    self.router.engine().settle().await;
    debug!("Worker stopped");
  }

  async fn dispatch(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install { reply } => {
        let _ = reply.send(self.install().await);
      }
      WorkerEvent::Activate { reply } => {
        let _ = reply.send(self.activate());
      }
      WorkerEvent::Fetch {
        request,
        client_id,
        abort,
        reply,
      } => {
        let controlled = self.lifecycle.is_controlling()
          && client_id
            .as_deref()
            .map_or(true, |id| self.clients.is_controlled(id));
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
          let response = match abort {
            Some(abort) => router.serve_abortable(&request, controlled, abort).await,
            None => router.serve(&request, controlled).await,
          };
          let _ = reply.send(response);
        });
      }
      WorkerEvent::Message { data, reply } => {
        let _ = reply.send(self.handle_message(&data));
      }
      WorkerEvent::Sync { tag, reply } => {
        let sync = Arc::clone(&self.sync);
        tokio::spawn(async move {
          let _ = reply.send(sync.run(&tag).await);
        });
      }
      WorkerEvent::Push { payload } => {
        if let Some(notification) = push::render(&payload, &self.config) {
          self.emit(HostEvent::ShowNotification(notification));
        }
      }
      WorkerEvent::NotificationClick { action, data } => {
        self.handle_click(action.as_deref(), &data);
      }
      WorkerEvent::ClientConnected { url, reply } => {
        let controlled = self.lifecycle.is_controlling();
        let _ = reply.send(self.clients.connect(url, controlled));
      }
      WorkerEvent::State { reply } => {
        let _ = reply.send(self.lifecycle.state());
      }
    }
  }

  fn emit(&self, event: HostEvent) {
    if self.host.send(event).is_err() {
      debug!("Host event receiver dropped");
    }
  }

  async fn install(&mut self) -> Result<InstallReport> {
    let report = self
      .lifecycle
      .install(self.router.engine(), self.router.buckets())
      .await?;

    if self.lifecycle.skips_waiting() && self.lifecycle.state() == WorkerState::Waiting {
      if let Err(e) = self.activate() {
        warn!(error = %e, "Activation after install failed");
      }
    }
    Ok(report)
  }

  fn activate(&mut self) -> Result<ActivateReport> {
    let report = self
      .lifecycle
      .activate(self.store.as_ref(), self.router.buckets(), &mut self.clients)?;
    self.emit(HostEvent::ClientsClaimed {
      count: report.claimed,
    });
    Ok(report)
  }

  fn handle_message(&mut self, data: &Value) -> Option<Value> {
    match ControlMessage::parse(data)? {
      ControlMessage::SkipWaiting => {
        if self.lifecycle.request_skip_waiting() {
          if let Err(e) = self.activate() {
            warn!(error = %e, "Skip-waiting activation failed");
          }
        }
        None
      }
      ControlMessage::GetVersion => Some(json!({ "version": self.lifecycle.version() })),
      ControlMessage::ClearCache => Some(json!({ "success": self.clear_cache().is_ok() })),
      ControlMessage::CacheTranslation { translation } => {
        let result = self.router.cache_translation(&translation);
        if let Err(e) = &result {
          warn!(error = %e, "Failed to cache translation");
        }
        Some(json!({ "success": result.is_ok() }))
      }
      ControlMessage::QueueSync { kind, payload } => match self.sync.enqueue(kind, &payload) {
        Ok(id) => Some(json!({ "success": true, "id": id })),
        Err(e) => {
          warn!(kind = kind.as_str(), error = %e, "Failed to queue sync item");
          Some(json!({ "success": false, "error": e.to_string() }))
        }
      },
    }
  }

  fn clear_cache(&self) -> Result<()> {
    let names = self
      .store
      .bucket_names()
      .inspect_err(|e| warn!(error = %e, "Failed to list buckets"))?;
    for name in &names {
      self
        .store
        .delete_bucket(name)
        .inspect_err(|e| warn!(bucket = %name, error = %e, "Failed to delete bucket"))?;
    }
    info!(deleted = names.len(), "All caches cleared");
    Ok(())
  }

  fn handle_click(&mut self, action: Option<&str>, data: &Value) {
    let target = match push::route_click(action, data) {
      ClickIntent::Dismiss => {
        debug!(action, "Notification dismissed");
        return;
      }
      ClickIntent::Open(target) => target,
    };

    if let Some(client) = self.clients.focus_matching(&target) {
      self.emit(HostEvent::FocusClient(client));
      return;
    }

    match self.router.root().join(&target) {
      Ok(url) => {
        let client = self.clients.open_window(url);
        self.emit(HostEvent::OpenWindow { url: client.url });
      }
      Err(e) => warn!(target = %target, error = %e, "Cannot open window for click target"),
    }
  }
}

/// Cloneable sender side of the worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker is not running"))
  }

  async fn request<T>(
    &self,
    make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent,
  ) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.send(make(reply))?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the request"))
  }

  pub async fn install(&self) -> Result<InstallReport> {
    self.request(|reply| WorkerEvent::Install { reply }).await?
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    self.request(|reply| WorkerEvent::Activate { reply }).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    self.fetch_for(request, None, None).await
  }

  /// Fetch on behalf of a known client; sending on `abort` cancels the fetch.
  pub async fn fetch_for(
    &self,
    request: Request,
    client_id: Option<String>,
    abort: Option<oneshot::Receiver<()>>,
  ) -> Result<Response> {
    self
      .request(|reply| WorkerEvent::Fetch {
        request,
        client_id,
        abort,
        reply,
      })
      .await
  }

  pub async fn post_message(&self, data: Value) -> Result<Option<Value>> {
    self.request(|reply| WorkerEvent::Message { data, reply }).await
  }

  pub async fn sync(&self, tag: &str) -> Result<SyncReport> {
    let tag = tag.to_string();
    self.request(|reply| WorkerEvent::Sync { tag, reply }).await
  }

  pub fn push(&self, payload: Vec<u8>) -> Result<()> {
    self.send(WorkerEvent::Push { payload })
  }

  pub fn click(&self, action: Option<String>, data: Value) -> Result<()> {
    self.send(WorkerEvent::NotificationClick { action, data })
  }

  pub async fn connect(&self, url: Url) -> Result<Client> {
    self
      .request(|reply| WorkerEvent::ClientConnected { url, reply })
      .await
  }

  pub async fn state(&self) -> Result<WorkerState> {
    self.request(|reply| WorkerEvent::State { reply }).await
  }
}
