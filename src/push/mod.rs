//! Push-delivered messages and the system notifications built from them.
//!
//! The push provider is an external collaborator: it hands the worker a
//! `PushPayload` while the app is backgrounded. The bridge turns that payload
//! into a `NotificationDescriptor`, asks the `Notifier` to display it, and
//! routes the user's click back to an app window.

mod bridge;
mod notification;
mod payload;

pub use bridge::{ClickOutcome, NotificationBridge};
pub use notification::{NotificationDescriptor, NotificationTray, Notifier};
pub use payload::{NotificationFields, PushPayload};
