//! Classification of intercepted requests into routing strategies.

use reqwest::Method;
use serde::Serialize;

use crate::config::Config;
use crate::http::{Destination, Request};

/// Why a request is left to the network untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReason {
  NotGet,
  CrossOrigin,
}

/// Expected content type of a static asset, used to pick a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
  Style,
  Script,
  Image,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
  Passthrough(PassReason),
  /// Full page load: network-first with write-back
  Navigation,
  /// Dynamic data: network-first without write-back
  Api,
  /// Everything else: cache-first
  Static(AssetKind),
}

/// Decide how a request is handled. Pure function of the request and config.
pub fn classify(request: &Request, config: &Config) -> Route {
  if request.method != Method::GET {
    return Route::Passthrough(PassReason::NotGet);
  }
  if request.url.origin() != config.origin.origin() {
    return Route::Passthrough(PassReason::CrossOrigin);
  }
  if request.is_navigation() {
    return Route::Navigation;
  }
  if request.url.path().starts_with(&config.api_prefix) {
    return Route::Api;
  }
  Route::Static(asset_kind(request))
}

fn asset_kind(request: &Request) -> AssetKind {
  match request.destination {
    Destination::Style => AssetKind::Style,
    Destination::Script => AssetKind::Script,
    Destination::Image => AssetKind::Image,
    _ => kind_from_extension(request.url.path()),
  }
}

fn kind_from_extension(path: &str) -> AssetKind {
  let ext = path
    .rsplit_once('.')
    .map(|(_, ext)| ext.to_ascii_lowercase())
    .unwrap_or_default();

  match ext.as_str() {
    "css" => AssetKind::Style,
    "js" | "mjs" => AssetKind::Script,
    "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" => AssetKind::Image,
    _ => AssetKind::Other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:5000").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_non_get_passes_through() {
    let req = Request::get(url("/api/import-incidents")).with_method(Method::POST);
    assert_eq!(
      classify(&req, &Config::default()),
      Route::Passthrough(PassReason::NotGet)
    );
  }

  #[test]
  fn test_cross_origin_passes_through() {
    let req = Request::get(Url::parse("https://cdn.example.com/leaflet.js").unwrap());
    assert_eq!(
      classify(&req, &Config::default()),
      Route::Passthrough(PassReason::CrossOrigin)
    );

    let other_port = Request::get(Url::parse("http://localhost:8080/").unwrap());
    assert_eq!(
      classify(&other_port, &Config::default()),
      Route::Passthrough(PassReason::CrossOrigin)
    );
  }

  #[test]
  fn test_navigation_wins_over_api_prefix() {
    let req = Request::navigate(url("/api/statistics"));
    assert_eq!(classify(&req, &Config::default()), Route::Navigation);
  }

  #[test]
  fn test_api_prefix() {
    let req = Request::get(url("/api/generate-hotspots"));
    assert_eq!(classify(&req, &Config::default()), Route::Api);
  }

  #[test]
  fn test_asset_kind_from_destination_and_extension() {
    let config = Config::default();
    let styled = Request::get(url("/theme")).with_destination(Destination::Style);
    assert_eq!(classify(&styled, &config), Route::Static(AssetKind::Style));

    let cases = [
      ("/static/style.css", AssetKind::Style),
      ("/static/app.js", AssetKind::Script),
      ("/static/wildlife_bg.JPG", AssetKind::Image),
      ("/manifest.json", AssetKind::Other),
      ("/predictions", AssetKind::Other),
    ];
    for (path, kind) in cases {
      assert_eq!(
        classify(&Request::get(url(path)), &config),
        Route::Static(kind),
        "{path}"
      );
    }
  }
}
