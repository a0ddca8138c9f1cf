//! Pages and windows the worker can see, focus, open and message.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  Window,
}

/// Snapshot of one client context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: Url,
  pub kind: ClientKind,
  pub focused: bool,
  /// Whether this worker controls the client
  pub controlled: bool,
}

/// Filter for `Clients::match_all`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
  pub kind: Option<ClientKind>,
  pub include_uncontrolled: bool,
}

impl Default for MatchOptions {
  fn default() -> Self {
    Self {
      kind: Some(ClientKind::Window),
      include_uncontrolled: false,
    }
  }
}

impl MatchOptions {
  pub fn windows_including_uncontrolled() -> Self {
    Self {
      kind: Some(ClientKind::Window),
      include_uncontrolled: true,
    }
  }

  fn accepts(&self, client: &ClientInfo) -> bool {
    self.kind.map_or(true, |kind| kind == client.kind) && (self.include_uncontrolled || client.controlled)
  }
}

/// Messages the worker posts to pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SyncData { message: String },
}

/// Host-side view of the clients in the worker's scope.
pub trait Clients: Send + Sync + 'static {
  fn match_all(&self, options: MatchOptions) -> Result<Vec<ClientInfo>>;

  /// Bring a client to the foreground.
  fn focus(&self, id: &str) -> Result<ClientInfo>;

  fn open_window(&self, url: &Url) -> Result<ClientInfo>;

  /// Take control of every client in scope. Returns how many changed hands.
  fn claim(&self) -> Result<usize>;

  fn post_message(&self, id: &str, message: &ClientMessage) -> Result<()>;
}

#[derive(Debug, Default)]
struct Registry {
  clients: Vec<ClientInfo>,
  inboxes: HashMap<String, Vec<ClientMessage>>,
  next_id: u64,
}

impl Registry {
  fn insert(&mut self, url: Url, kind: ClientKind, focused: bool, controlled: bool) -> ClientInfo {
    self.next_id += 1;
    let client = ClientInfo {
      id: format!("client-{}", self.next_id),
      url,
      kind,
      focused,
      controlled,
    };
    if focused {
      self.clients.iter_mut().for_each(|c| c.focused = false);
    }
    self.clients.push(client.clone());
    client
  }
}

/// In-process client registry.
#[derive(Debug, Default)]
pub struct WindowRegistry {
  inner: Mutex<Registry>,
}

impl WindowRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a window that is open but not yet controlled by the worker.
  pub fn add_window(&self, url: Url) -> Result<ClientInfo> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.insert(url, ClientKind::Window, false, false))
  }

  pub fn clients(&self) -> Result<Vec<ClientInfo>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clients.clone())
  }

  /// Messages posted to a client so far.
  pub fn inbox(&self, id: &str) -> Result<Vec<ClientMessage>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.inboxes.get(id).cloned().unwrap_or_default())
  }
}

impl Clients for WindowRegistry {
  fn match_all(&self, options: MatchOptions) -> Result<Vec<ClientInfo>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .clients
        .iter()
        .filter(|c| options.accepts(c))
        .cloned()
        .collect(),
    )
  }

  fn focus(&self, id: &str) -> Result<ClientInfo> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !inner.clients.iter().any(|c| c.id == id) {
      return Err(eyre!("No client with id {}", id));
    }

    let mut focused = None;
    // exactly one window holds focus
    for client in inner.clients.iter_mut() {
      client.focused = client.id == id;
      if client.focused {
        focused = Some(client.clone());
      }
    }

    focused.ok_or_else(|| eyre!("No client with id {}", id))
  }

  fn open_window(&self, url: &Url) -> Result<ClientInfo> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.insert(url.clone(), ClientKind::Window, true, true))
  }

  fn claim(&self) -> Result<usize> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut claimed = 0;
    for client in inner.clients.iter_mut().filter(|c| !c.controlled) {
      client.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  fn post_message(&self, id: &str, message: &ClientMessage) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !inner.clients.iter().any(|c| c.id == id) {
      return Err(eyre!("No client with id {}", id));
    }

    inner
      .inboxes
      .entry(id.to_string())
      .or_default()
      .push(message.clone());
    Ok(())
  }
}
