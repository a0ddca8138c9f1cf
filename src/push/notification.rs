use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

use super::payload::PushPayload;
use crate::config::NotificationConfig;

/// Everything the platform needs to display one notification.
///
/// Built on receipt of a payload and handed straight to the `Notifier`;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Deduplication key: a newer notification with the same tag replaces the older one
  pub tag: String,
  /// Opaque payload data passed through to click handling
  pub data: Value,
  pub require_interaction: bool,
  pub vibrate: Vec<u32>,
}

impl NotificationDescriptor {
  /// Derive a descriptor from a push payload, filling gaps from `defaults`.
  ///
  /// Without a data `type` the tag is `notification-<millis>` taken from `now`.
  pub fn from_payload(payload: &PushPayload, defaults: &NotificationConfig, now: DateTime<Utc>) -> Self {
    let tag = payload
      .data_type()
      .map(String::from)
      .unwrap_or_else(|| format!("notification-{}", now.timestamp_millis()));

    Self {
      title: payload
        .title()
        .unwrap_or(&defaults.default_title)
        .to_string(),
      body: payload.body().unwrap_or(&defaults.default_body).to_string(),
      icon: defaults.icon.clone(),
      badge: defaults.badge.clone(),
      tag,
      data: payload.data.clone().unwrap_or(Value::Null),
      require_interaction: defaults.require_interaction,
      vibrate: defaults.vibrate.clone(),
    }
  }
}

/// Platform notification surface.
pub trait Notifier: Send + Sync + 'static {
  fn show(&self, notification: &NotificationDescriptor) -> Result<()>;

  /// Dismiss the notification with this tag. Returns false if none was shown.
  fn close(&self, tag: &str) -> Result<bool>;
}

/// In-process notification surface: keeps the displayed notifications in
/// order, one per tag.
#[derive(Debug, Default)]
pub struct NotificationTray {
  shown: Mutex<Vec<NotificationDescriptor>>,
}

impl NotificationTray {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn displayed(&self) -> Result<Vec<NotificationDescriptor>> {
    let shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(shown.clone())
  }
}

impl Notifier for NotificationTray {
  fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    let mut shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    shown.retain(|n| n.tag != notification.tag);
    shown.push(notification.clone());
    tracing::info!("Showing notification '{}' [{}]", notification.title, notification.tag);
    Ok(())
  }

  fn close(&self, tag: &str) -> Result<bool> {
    let mut shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let before = shown.len();
    shown.retain(|n| n.tag != tag);
    Ok(shown.len() != before)
  }
}
