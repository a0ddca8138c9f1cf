use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message as delivered by the push provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
  pub message_id: Option<String>,
  /// Sender id of the provider project
  pub from: Option<String>,
  pub notification: Option<NotificationFields>,
  /// Opaque application data, passed through to click handling
  pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFields {
  pub title: Option<String>,
  pub body: Option<String>,
  pub image: Option<String>,
}

impl PushPayload {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Failed to parse push payload: {}", e))
  }

  pub fn title(&self) -> Option<&str> {
    self
      .notification
      .as_ref()
      .and_then(|n| n.title.as_deref())
      .filter(|t| !t.is_empty())
  }

  pub fn body(&self) -> Option<&str> {
    self
      .notification
      .as_ref()
      .and_then(|n| n.body.as_deref())
      .filter(|b| !b.is_empty())
  }

  /// The `type` field of the data block, used as the dedup tag.
  pub fn data_type(&self) -> Option<&str> {
    self
      .data
      .as_ref()
      .and_then(|d| d.get("type"))
      .and_then(Value::as_str)
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_full_payload() {
    let payload = PushPayload::from_json(
      r#"{
        "messageId": "0:1700000000",
        "from": "473181664730",
        "notification": { "title": "Spot freed", "body": "Level 2 has space" },
        "data": { "type": "spot_available", "spotId": "B-12" }
      }"#,
    )
    .unwrap();

    assert_eq!(payload.message_id.as_deref(), Some("0:1700000000"));
    assert_eq!(payload.title(), Some("Spot freed"));
    assert_eq!(payload.body(), Some("Level 2 has space"));
    assert_eq!(payload.data_type(), Some("spot_available"));
  }

  #[test]
  fn test_missing_and_empty_fields() {
    let payload = PushPayload::from_json(r#"{ "notification": { "title": "" }, "data": { "type": 3 } }"#).unwrap();
    assert_eq!(payload.title(), None);
    assert_eq!(payload.body(), None);
    assert_eq!(payload.data_type(), None);

    let empty = PushPayload::from_json("{}").unwrap();
    assert_eq!(empty, PushPayload::default());
  }

  #[test]
  fn test_invalid_json_is_error() {
    assert!(PushPayload::from_json("not json").is_err());
  }
}
