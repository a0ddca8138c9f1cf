//! The worker: one handler per lifecycle event, selected by event kind.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, CacheStoreManager};
use crate::clients::{ClientMessage, Clients, MatchOptions};
use crate::config::Config;
use crate::event::{EventKind, WaitUntil, WorkerEvent, WorkerMessage};
use crate::network::{Network, Request};
use crate::push::{ClickOutcome, NotificationBridge, NotificationDescriptor, Notifier, PushPayload};
use crate::router::{CacheRouter, Classifier, FetchOutcome};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting to take over
  Installed,
  Activating,
  Activated,
  /// Failed install; the host retries with a fresh worker
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

#[derive(Debug)]
struct Lifecycle {
  state: WorkerState,
  /// Take over as soon as installed instead of waiting for clients to close
  skip_waiting: bool,
}

/// What a handler did
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed { precached: usize },
  Activated { removed: Vec<String>, claimed: usize },
  Fetch(FetchOutcome),
  SkipWaiting,
  /// Bulk caching continues on the event's wait-until set
  CachingUrls { count: usize },
  Notified(NotificationDescriptor),
  Clicked(ClickOutcome),
  Synced { notified: usize },
  /// Unrecognized message or sync tag
  Ignored,
}

/// Background worker wiring the cache router, store manager and notification
/// bridge to lifecycle events.
pub struct Worker<S: CacheStorage, N: Network, C: Clients, P: Notifier> {
  config: Arc<Config>,
  origin: Url,
  router: CacheRouter<S, N>,
  stores: CacheStoreManager<S, N>,
  bridge: NotificationBridge<P, C>,
  clients: Arc<C>,
  lifecycle: Mutex<Lifecycle>,
}

impl<S: CacheStorage, N: Network, C: Clients, P: Notifier> Worker<S, N, C, P> {
  pub fn new(config: Config, storage: Arc<S>, network: Arc<N>, clients: Arc<C>, notifier: Arc<P>) -> Result<Self> {
    let origin = config.origin_url()?;
    let offline_fallback = origin
      .join(&config.routing.offline_fallback)
      .map_err(|e| eyre!("Invalid offline fallback '{}': {}", config.routing.offline_fallback, e))?;

    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      &config.caches.runtime,
      offline_fallback,
    )
    .with_refresh_on_hit(config.routing.refresh_on_hit);

    let router = CacheRouter::new(
      Classifier::new(origin.clone(), config.routing.clone()),
      layer,
    );

    let stores = CacheStoreManager::new(storage, network, config.caches.clone(), origin.clone());

    let bridge = NotificationBridge::new(
      notifier,
      Arc::clone(&clients),
      config.notifications.clone(),
      origin.clone(),
    );

    if !config.push_provider.is_configured() {
      debug!("Push provider credentials incomplete; background messages rely on the host");
    }

    Ok(Self {
      config: Arc::new(config),
      origin,
      router,
      stores,
      bridge,
      clients,
      lifecycle: Mutex::new(Lifecycle {
        state: WorkerState::Parsed,
        skip_waiting: false,
      }),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn state(&self) -> Result<WorkerState> {
    Ok(self.lock_lifecycle()?.state)
  }

  /// Installed and asked to skip waiting: the host should activate now.
  pub fn ready_to_activate(&self) -> Result<bool> {
    let lifecycle = self.lock_lifecycle()?;
    Ok(lifecycle.state == WorkerState::Installed && lifecycle.skip_waiting)
  }

  /// Run the handler for `event`.
  ///
  /// Work that outlives the handler is registered on `lifetime`; the host
  /// awaits `lifetime.settle()` before tearing the worker down.
  pub async fn dispatch(&self, event: WorkerEvent, lifetime: &WaitUntil) -> Result<EventOutcome> {
    let kind = event.kind();
    debug!("Dispatching {} event", kind);

    let result = match event {
      WorkerEvent::Install => self.on_install().await,
      WorkerEvent::Activate => self.on_activate().await,
      WorkerEvent::Fetch(request) => self.on_fetch(&request, lifetime).await,
      WorkerEvent::Message(data) => self.on_message(&data, lifetime),
      WorkerEvent::Push(payload) => self.on_push(&payload),
      WorkerEvent::NotificationClick(notification) => self.on_notification_click(&notification),
      WorkerEvent::Sync { tag } => self.on_sync(&tag),
    };

    if let Err(e) = &result {
      if kind != EventKind::Fetch {
        warn!("{} handler failed: {}", kind, e);
      }
    }

    result
  }

  async fn on_install(&self) -> Result<EventOutcome> {
    info!("Installing worker...");
    self.set_state(WorkerState::Installing)?;

    let manifest = self.config.manifest.entries();
    match self.stores.install(&manifest).await {
      Ok(precached) => {
        {
          let mut lifecycle = self.lock_lifecycle()?;
          lifecycle.state = WorkerState::Installed;
          lifecycle.skip_waiting = true;
        }
        info!("Worker installed, {} assets precached", precached);
        Ok(EventOutcome::Installed { precached })
      }
      Err(e) => {
        error!("Precaching failed: {}", e);
        self.set_state(WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn on_activate(&self) -> Result<EventOutcome> {
    info!("Activating worker...");
    self.set_state(WorkerState::Activating)?;

    let removed = self.stores.activate().await?;
    let claimed = self.clients.claim()?;

    self.set_state(WorkerState::Activated)?;
    info!("Worker activated, claimed {} clients", claimed);

    Ok(EventOutcome::Activated { removed, claimed })
  }

  async fn on_fetch(&self, request: &Request, lifetime: &WaitUntil) -> Result<EventOutcome> {
    let outcome = self.router.handle(request, lifetime).await?;
    Ok(EventOutcome::Fetch(outcome))
  }

  fn on_message(&self, data: &serde_json::Value, lifetime: &WaitUntil) -> Result<EventOutcome> {
    let message = match WorkerMessage::parse(data) {
      Ok(message) => message,
      Err(e) => {
        debug!("Ignoring message: {}", e);
        return Ok(EventOutcome::Ignored);
      }
    };

    match message {
      WorkerMessage::SkipWaiting => {
        self.lock_lifecycle()?.skip_waiting = true;
        Ok(EventOutcome::SkipWaiting)
      }
      WorkerMessage::CacheUrls { payload } => {
        let count = payload.len();
        let stores = self.stores.clone();
        lifetime.wait_until(async move {
          if let Err(e) = stores.cache_urls(&payload).await {
            warn!("Bulk caching failed: {}", e);
          }
        });
        Ok(EventOutcome::CachingUrls { count })
      }
    }
  }

  fn on_push(&self, payload: &PushPayload) -> Result<EventOutcome> {
    let descriptor = self.bridge.on_background_message(payload)?;
    Ok(EventOutcome::Notified(descriptor))
  }

  fn on_notification_click(&self, notification: &NotificationDescriptor) -> Result<EventOutcome> {
    let outcome = self.bridge.on_notification_click(notification)?;
    Ok(EventOutcome::Clicked(outcome))
  }

  /// Tell every open page to resync. Best effort: no pages, nothing happens.
  fn on_sync(&self, tag: &str) -> Result<EventOutcome> {
    info!("Background sync: {}", tag);
    if tag != self.config.sync.tag {
      return Ok(EventOutcome::Ignored);
    }

    let message = ClientMessage::SyncData {
      message: "Background sync triggered".to_string(),
    };

    let mut notified = 0;
    for client in self.clients.match_all(MatchOptions::default())? {
      match self.clients.post_message(&client.id, &message) {
        Ok(()) => notified += 1,
        Err(e) => warn!("Failed to notify client {}: {}", client.id, e),
      }
    }

    Ok(EventOutcome::Synced { notified })
  }

  fn lock_lifecycle(&self) -> Result<std::sync::MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_state(&self, state: WorkerState) -> Result<()> {
    self.lock_lifecycle()?.state = state;
    Ok(())
  }
}
