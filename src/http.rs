//! Request and response types exchanged between pages, the controller and the network.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  /// Sub-resource load (fetch/XHR, stylesheet, script, image, ...)
  #[default]
  Subresource,
}

/// What the page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Style,
  Script,
  Image,
  Font,
  #[default]
  Other,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  /// A plain GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      destination: Destination::Other,
    }
  }

  /// A full page load of `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Identity under which this request is stored in a cache store.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Cache identity of a request: method plus URL, fragment stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A captured or synthesized HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  #[serde(default)]
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Append a header, replacing any existing value with the same name.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  /// True for 2xx statuses.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}
