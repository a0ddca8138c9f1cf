use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

use crate::network::Request;
use crate::push::{NotificationDescriptor, PushPayload};

/// Lifecycle events delivered to the worker by its host
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// Outgoing resource request from a controlled page
  Fetch(Request),
  /// Inter-context message posted by a page
  Message(serde_json::Value),
  /// Payload delivered by the push provider while the app is backgrounded
  Push(PushPayload),
  /// User clicked a displayed notification
  NotificationClick(NotificationDescriptor),
  /// Connectivity restored for a registered sync tag
  Sync { tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Message,
  Push,
  NotificationClick,
  Sync,
}

impl WorkerEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      WorkerEvent::Install => EventKind::Install,
      WorkerEvent::Activate => EventKind::Activate,
      WorkerEvent::Fetch(_) => EventKind::Fetch,
      WorkerEvent::Message(_) => EventKind::Message,
      WorkerEvent::Push(_) => EventKind::Push,
      WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
      WorkerEvent::Sync { .. } => EventKind::Sync,
    }
  }
}

impl std::fmt::Display for EventKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      EventKind::Install => "install",
      EventKind::Activate => "activate",
      EventKind::Fetch => "fetch",
      EventKind::Message => "message",
      EventKind::Push => "push",
      EventKind::NotificationClick => "notificationclick",
      EventKind::Sync => "sync",
    };
    write!(f, "{}", name)
  }
}

/// Messages pages may post to the worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Activate the waiting worker without waiting for clients to close
  SkipWaiting,
  /// Add the listed URLs to the runtime store
  CacheUrls { payload: Vec<String> },
}

impl WorkerMessage {
  pub fn parse(data: &serde_json::Value) -> Result<Self> {
    serde_json::from_value(data.clone()).map_err(|e| eyre!("Unrecognized message: {}", e))
  }
}

/// Work an event handler left running after it returned.
///
/// The host must `settle()` before tearing the worker down, otherwise the
/// registered tasks may be cut short.
#[derive(Debug, Default)]
pub struct WaitUntil {
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WaitUntil {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `task` and keep the event alive until it completes.
  pub fn wait_until<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(task);
    self
      .tasks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(handle);
  }

  /// Number of registered tasks not yet awaited.
  pub fn pending(&self) -> usize {
    self
      .tasks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Wait for every registered task to finish.
  pub async fn settle(&self) {
    loop {
      let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
      if tasks.is_empty() {
        break;
      }

      for task in tasks {
        if let Err(e) = task.await {
          tracing::warn!("Background task did not complete: {}", e);
        }
      }
    }
  }
}
