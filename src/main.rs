mod cache;
mod classify;
mod clients;
mod config;
mod http;
mod lifecycle;
mod logging;
mod messages;
mod network;
mod offline;
mod push;
mod router;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cache::{BucketStore, SqliteStore};
use http::{Destination, Request, Response};
use network::{Disconnected, HostNetwork, HttpNetwork};
use sync::{SyncKind, SyncStore};
use worker::{Worker, WorkerHandle};

#[derive(Parser, Debug)]
#[command(name = "meditranslate-sw")]
#[command(about = "Offline request routing and caching engine for MediTranslate+")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/meditranslate-sw/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: <data_dir>/cache.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the static bucket from the install manifest
  Install,
  /// Activate the installed generation and prune old buckets
  Activate,
  /// Route one request through the worker
  Fetch {
    /// Absolute URL, or a path resolved against the configured origin
    url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    #[arg(long, value_enum, default_value_t = Destination::Empty)]
    destination: Destination,

    /// Accept header
    #[arg(long)]
    accept: Option<String>,

    /// Extra header as "name: value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Post a control message, e.g. '{"type":"GET_VERSION"}'
  Message { json: String },
  /// Queue a mutation for background sync
  Enqueue {
    #[arg(value_enum)]
    kind: SyncKind,
    /// JSON payload
    payload: String,
  },
  /// Signal that connectivity returned for a sync tag
  Sync {
    #[arg(default_value = "background-sync")]
    tag: String,
  },
  /// Inspect or clear the sync queue
  Queue {
    /// Show dead-lettered items instead of pending ones
    #[arg(long)]
    dead: bool,

    /// Remove queued items (of --kind, or all)
    #[arg(long)]
    clear: bool,

    #[arg(long, value_enum)]
    kind: Option<SyncKind>,
  },
  /// Deliver a push payload
  Push {
    /// JSON payload; omit for an empty push
    payload: Option<String>,
  },
  /// Simulate a notification click
  Click {
    #[arg(long)]
    action: Option<String>,

    /// Notification data as JSON
    #[arg(long, default_value = "{}")]
    data: String,

    /// URL of an open window, may be repeated
    #[arg(long = "client")]
    clients: Vec<String>,
  },
  /// List cache buckets and their entry counts
  Buckets,
  /// Show the lifecycle state and cache generation
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = logging::init(&data_dir.join("logs"), args.verbose)?;

  let db_path = args.db.unwrap_or_else(|| data_dir.join("cache.db"));
  let store = Arc::new(SqliteStore::open(&db_path)?);

  let network = if args.offline {
    HostNetwork::Disconnected(Disconnected)
  } else {
    HostNetwork::Http(HttpNetwork::new()?)
  };

  info!(db = %db_path.display(), offline = args.offline, "Starting worker");

  let origin = config.origin.clone();
  let (handle, mut host_events) = Worker::spawn(config, Arc::clone(&store), Arc::new(network));

  run(args.command, &handle, store.as_ref(), &origin).await?;

  // The worker exits once every handle is gone; then the host stream closes.
  drop(handle);
  while let Some(event) = host_events.recv().await {
    println!("event: {}", serde_json::to_string(&event)?);
  }

  Ok(())
}

async fn run(
  command: Command,
  handle: &WorkerHandle,
  store: &SqliteStore,
  origin: &url::Url,
) -> Result<()> {
  match command {
    Command::Install => print_json(&handle.install().await?),
    Command::Activate => print_json(&handle.activate().await?),
    Command::Fetch {
      url,
      method,
      destination,
      accept,
      headers,
      data,
    } => {
      let url = origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;

      let mut request = if method == reqwest::Method::GET && destination == Destination::Document {
        Request::navigate(url)
      } else {
        Request::new(method, url).with_destination(destination)
      };
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must look like 'name: value', got {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(data) = data {
        request = request.with_body(data.into_bytes());
      }

      print_response(&handle.fetch(request).await?);
      Ok(())
    }
    Command::Message { json } => {
      let data = parse_json(&json)?;
      match handle.post_message(data).await? {
        Some(reply) => print_json(&reply),
        None => {
          println!("(no reply)");
          Ok(())
        }
      }
    }
    Command::Enqueue { kind, payload } => {
      let payload = parse_json(&payload)?;
      let reply = handle
        .post_message(json!({ "type": "QUEUE_SYNC", "kind": kind, "payload": payload }))
        .await?;
      print_json(&reply)
    }
    Command::Sync { tag } => print_json(&handle.sync(&tag).await?),
    Command::Queue { dead, clear, kind } => {
      if clear {
        let removed = store.clear(kind)?;
        println!("Removed {} queued item(s)", removed);
        return Ok(());
      }
      let items = if dead {
        store.dead_letters()?
      } else {
        store.pending(kind)?
      };
      print_json(&items)
    }
    Command::Push { payload } => handle.push(payload.unwrap_or_default().into_bytes()),
    Command::Click {
      action,
      data,
      clients,
    } => {
      for client in &clients {
        let url = origin
          .join(client)
          .map_err(|e| eyre!("Invalid client URL {}: {}", client, e))?;
        handle.connect(url).await?;
      }
      handle.click(action, parse_json(&data)?)
    }
    Command::Status => {
      let state = handle.state().await?;
      let version = handle
        .post_message(json!({ "type": "GET_VERSION" }))
        .await?
        .and_then(|reply| reply.get("version").cloned())
        .unwrap_or(Value::Null);
      print_json(&json!({ "state": state, "version": version }))
    }
    Command::Buckets => {
      for name in store.bucket_names()? {
        println!("{}\t{}", name, store.keys(&name)?.len());
      }
      Ok(())
    }
  }
}

fn parse_json(s: &str) -> Result<Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Invalid JSON: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_response(response: &Response) {
  println!("{} ({})", response.status, response.source);
  for (name, value) in response.headers.iter() {
    println!("{}: {}", name, value);
  }
  println!();
  match response.content_type() {
    Some(ct) if !is_textual(ct) => println!("<{} bytes of {}>", response.body.len(), ct),
    _ => println!("{}", String::from_utf8_lossy(&response.body)),
  }
}

fn is_textual(content_type: &str) -> bool {
  content_type.starts_with("text/")
    || content_type.contains("json")
    || content_type.contains("javascript")
    || content_type.contains("xml")
}
