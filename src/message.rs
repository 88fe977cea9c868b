//! Messages exchanged between open pages and the controller.

use serde::{Deserialize, Serialize};

/// Message posted by a page to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting version now
  SkipWaiting,
  /// Cache these URLs proactively
  CacheUrls { urls: Vec<String> },
}

/// Notification broadcast from the controller to every open page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientNotification {
  CacheComplete { urls: Vec<String> },
}
