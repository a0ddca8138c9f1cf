use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::notification::{NotificationDescriptor, Notifier};
use super::payload::PushPayload;
use crate::clients::{ClientInfo, Clients, MatchOptions};
use crate::config::NotificationConfig;

/// What a notification click did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open app window was brought to the foreground
  Focused(ClientInfo),
  /// No app window was open, so a new one was opened
  Opened(ClientInfo),
}

/// Turns background push payloads into notifications and routes clicks back
/// to the app.
pub struct NotificationBridge<P: Notifier, C: Clients> {
  notifier: Arc<P>,
  clients: Arc<C>,
  defaults: NotificationConfig,
  origin: Url,
}

impl<P: Notifier, C: Clients> NotificationBridge<P, C> {
  pub fn new(notifier: Arc<P>, clients: Arc<C>, defaults: NotificationConfig, origin: Url) -> Self {
    Self {
      notifier,
      clients,
      defaults,
      origin,
    }
  }

  /// Build a descriptor from a background message and display it.
  pub fn on_background_message(&self, payload: &PushPayload) -> Result<NotificationDescriptor> {
    info!(
      "Received background message {}",
      payload.message_id.as_deref().unwrap_or("<no id>")
    );
    debug!(
      "Title: {:?}, body: {:?}, data: {:?}",
      payload.title(),
      payload.body(),
      payload.data
    );

    let descriptor = NotificationDescriptor::from_payload(payload, &self.defaults, Utc::now());
    self.notifier.show(&descriptor)?;

    Ok(descriptor)
  }

  /// Dismiss the clicked notification, then focus an app window or open one.
  pub fn on_notification_click(&self, notification: &NotificationDescriptor) -> Result<ClickOutcome> {
    debug!("Notification clicked [{}]", notification.tag);
    self.notifier.close(&notification.tag)?;

    let windows = self
      .clients
      .match_all(MatchOptions::windows_including_uncontrolled())?;

    if let Some(window) = windows
      .iter()
      .find(|w| w.url.origin() == self.origin.origin())
    {
      let focused = self.clients.focus(&window.id)?;
      return Ok(ClickOutcome::Focused(focused));
    }

    let target = self
      .origin
      .join(&self.defaults.open_path)
      .map_err(|e| eyre!("Invalid open path '{}': {}", self.defaults.open_path, e))?;
    let opened = self.clients.open_window(&target)?;

    Ok(ClickOutcome::Opened(opened))
  }
}
