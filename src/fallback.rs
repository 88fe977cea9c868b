//! Responses synthesized when neither the network nor the cache can answer.

use serde_json::json;

use crate::http::Response;
use crate::route::AssetKind;

/// Status used for API requests that could not reach the server.
pub const API_OFFLINE_STATUS: u16 = 408;

const OFFLINE_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline - Wildlife Incident Reporter</title>
</head>
<body>
  <h1>You are offline</h1>
  <p>This page is not available offline. Reconnect and try again.</p>
</body>
</html>
"#;

/// Last-resort page for navigations with no network, no cached copy and no cached offline page.
pub fn offline_document() -> Response {
  Response::new(200, OFFLINE_DOCUMENT).with_header("Content-Type", "text/html")
}

/// Error body for API requests made while offline.
pub fn api_offline() -> Response {
  let body = json!({
    "error": "offline",
    "message": "You are offline. This data is unavailable until the connection is restored.",
    "canWorkOffline": true,
  });

  Response::new(API_OFFLINE_STATUS, body.to_string())
    .with_header("Content-Type", "application/json")
}

/// Placeholder for a static asset that is neither cached nor reachable.
pub fn asset_placeholder(kind: AssetKind) -> Response {
  match kind {
    AssetKind::Style => Response::new(200, "").with_header("Content-Type", "text/css"),
    AssetKind::Script => {
      Response::new(200, "// Offline").with_header("Content-Type", "application/javascript")
    }
    AssetKind::Image | AssetKind::Other => Response::new(404, ""),
  }
}
