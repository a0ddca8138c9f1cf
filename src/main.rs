use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use pwa_worker::cache::{CacheStorage, SqliteStorage};
use pwa_worker::clients::WindowRegistry;
use pwa_worker::config::Config;
use pwa_worker::event::{WaitUntil, WorkerEvent};
use pwa_worker::logging;
use pwa_worker::network::{HttpNetwork, Request};
use pwa_worker::push::{ClickOutcome, NotificationTray, PushPayload};
use pwa_worker::router::FetchOutcome;
use pwa_worker::worker::{EventOutcome, Worker};

type CliWorker = Worker<SqliteStorage, HttpNetwork, WindowRegistry, NotificationTray>;

#[derive(Parser, Debug)]
#[command(name = "pwa-worker")]
#[command(about = "Offline cache router and push notification bridge for a progressive web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pwa-worker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin the worker serves, overriding the configured one
  #[arg(long, global = true)]
  origin: Option<Url>,

  /// Path to the cache database (default: $XDG_DATA_HOME/pwa-worker/caches.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Write logs to a daily rolling file in this directory instead of stderr
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest, then activate if the worker asks to skip waiting
  Install,
  /// Delete stale stores and claim clients
  Activate,
  /// Route one request through the worker
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
  },
  /// Post a message to the worker
  Message {
    #[command(subcommand)]
    message: MessageCommand,
  },
  /// Deliver a push payload (JSON file, or - for stdin)
  Push { file: PathBuf },
  /// Deliver a push payload and click the resulting notification
  Click { file: PathBuf },
  /// Fire a background sync event
  Sync { tag: String },
  /// List stores and their entry counts
  Caches,
}

#[derive(Subcommand, Debug)]
enum MessageCommand {
  SkipWaiting,
  CacheUrls {
    #[arg(required = true)]
    urls: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _logging = logging::init_logging(args.log_dir.as_deref())?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin.to_string();
  }
  if let Some(db) = args.db {
    config.storage.path = Some(db);
  }

  let storage = Arc::new(SqliteStorage::open(&config.storage.resolve_path()?)?);

  if let Command::Caches = args.command {
    return list_caches(storage.as_ref());
  }

  let worker = Worker::new(
    config,
    storage,
    Arc::new(HttpNetwork::new()?),
    Arc::new(WindowRegistry::new()),
    Arc::new(NotificationTray::new()),
  )?;

  match args.command {
    Command::Install => {
      report(dispatch(&worker, WorkerEvent::Install).await?);
      if worker.ready_to_activate()? {
        report(dispatch(&worker, WorkerEvent::Activate).await?);
      }
      println!("Worker {}", worker.state()?);
    }
    Command::Activate => {
      report(dispatch(&worker, WorkerEvent::Activate).await?);
      println!("Worker {}", worker.state()?);
    }
    Command::Fetch { url, method, headers } => {
      let request = headers.into_iter().fold(
        Request::new(parse_method(&method)?, resolve(&worker, &url)?),
        |request, (name, value)| request.with_header(name, value),
      );
      report(dispatch(&worker, WorkerEvent::Fetch(request)).await?);
    }
    Command::Message { message } => {
      let data = match message {
        MessageCommand::SkipWaiting => serde_json::json!({ "type": "SKIP_WAITING" }),
        MessageCommand::CacheUrls { urls } => {
          serde_json::json!({ "type": "CACHE_URLS", "payload": urls })
        }
      };
      report(dispatch(&worker, WorkerEvent::Message(data)).await?);
    }
    Command::Push { file } => {
      let payload = read_payload(&file)?;
      report(dispatch(&worker, WorkerEvent::Push(payload)).await?);
    }
    Command::Click { file } => {
      let payload = read_payload(&file)?;
      if let EventOutcome::Notified(notification) = dispatch(&worker, WorkerEvent::Push(payload)).await? {
        report(dispatch(&worker, WorkerEvent::NotificationClick(notification)).await?);
      }
    }
    Command::Sync { tag } => report(dispatch(&worker, WorkerEvent::Sync { tag }).await?),
    Command::Caches => {}
  }

  Ok(())
}

/// Run one event and wait for the work it left behind.
async fn dispatch(worker: &CliWorker, event: WorkerEvent) -> Result<EventOutcome> {
  let lifetime = WaitUntil::new();
  let outcome = worker.dispatch(event, &lifetime).await;
  lifetime.settle().await;
  outcome
}

fn list_caches(storage: &SqliteStorage) -> Result<()> {
  let names = storage.store_names()?;
  if names.is_empty() {
    println!("No caches");
    return Ok(());
  }

  for name in names {
    println!("{}\t{}", name, storage.entry_count(&name)?);
  }
  Ok(())
}

fn report(outcome: EventOutcome) {
  match outcome {
    EventOutcome::Installed { precached } => println!("Installed: {} assets precached", precached),
    EventOutcome::Activated { removed, claimed } => {
      println!("Activated: claimed {} clients", claimed);
      for name in removed {
        println!("Deleted cache {}", name);
      }
    }
    EventOutcome::Fetch(FetchOutcome::Passthrough) => println!("Not intercepted"),
    EventOutcome::Fetch(FetchOutcome::Responded(served)) => println!(
      "{} {} ({}, {} bytes)",
      served.response.status,
      served.response.url,
      served.source,
      served.response.body.len()
    ),
    EventOutcome::SkipWaiting => println!("Skip waiting requested"),
    EventOutcome::CachingUrls { count } => println!("Caching {} URLs", count),
    EventOutcome::Notified(notification) => match serde_json::to_string_pretty(&notification) {
      Ok(json) => println!("{}", json),
      Err(e) => println!("Notification '{}' shown ({})", notification.title, e),
    },
    EventOutcome::Clicked(ClickOutcome::Focused(client)) => println!("Focused {}", client.url),
    EventOutcome::Clicked(ClickOutcome::Opened(client)) => println!("Opened {}", client.url),
    EventOutcome::Synced { notified } => println!("Sync delivered to {} clients", notified),
    EventOutcome::Ignored => println!("Ignored"),
  }
}

fn parse_method(method: &str) -> Result<Method> {
  Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))
}

/// Parse a "Name: value" header argument.
fn parse_header(header: &str) -> std::result::Result<(String, String), String> {
  let (name, value) = header
    .split_once(':')
    .ok_or_else(|| format!("expected \"Name: value\", got '{}'", header))?;

  let name = name.trim();
  if name.is_empty() {
    return Err(format!("header name is empty in '{}'", header));
  }

  Ok((name.to_string(), value.trim().to_string()))
}

fn resolve(worker: &CliWorker, url: &str) -> Result<Url> {
  worker
    .origin()
    .join(url)
    .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
}

fn read_payload(file: &Path) -> Result<PushPayload> {
  let json = if file == Path::new("-") {
    std::io::read_to_string(std::io::stdin()).map_err(|e| eyre!("Failed to read stdin: {}", e))?
  } else {
    std::fs::read_to_string(file).map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?
  };

  PushPayload::from_json(&json)
}
