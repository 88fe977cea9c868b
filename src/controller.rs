//! The offline cache controller: one handler per lifecycle or network event.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::{Config, InstallPolicy};
use crate::event::{Event, Outcome};
use crate::fallback;
use crate::http::{Request, RequestKey, Response};
use crate::message::{ClientMessage, ClientNotification};
use crate::network::Network;
use crate::route::{self, AssetKind, PassReason, Route};
use crate::sync::{sync_pending_incidents, SYNC_INCIDENTS_TAG};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
  pub version: String,
  /// URLs now present in the store
  pub cached: Vec<String>,
  /// Best-effort URLs that could not be cached
  pub skipped: Vec<String>,
  /// Activate without waiting for old pages to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateOutcome {
  pub version: String,
  /// Stores removed because their version differs from the current one
  pub deleted: Vec<String>,
  /// Take control of every open page immediately
  pub claim_clients: bool,
}

/// What to do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not handled; the host performs its default network fetch
  Passthrough(PassReason),
  /// Answer the page with this response
  Respond(CacheResult<Response>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
  Completed,
  /// Tag not recognized
  Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
  SkipWaiting,
  /// Deliver this notification to every open page
  Broadcast(ClientNotification),
}

/// Offline cache controller for a single origin and cache version.
pub struct OfflineController<S: CacheStorage, N: Network> {
  config: Arc<Config>,
  offline_url: Url,
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S: CacheStorage, N: Network> OfflineController<S, N> {
  pub fn new(config: Config, storage: Arc<S>, network: Arc<N>) -> Result<Self> {
    config.validate()?;
    let offline_url = config.resolve(&config.offline_page)?;
    let cache = CacheLayer::new(storage, config.storage_scope(), config.cache_version.clone());

    Ok(Self {
      config: Arc::new(config),
      offline_url,
      cache,
      network,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn version(&self) -> &str {
    self.cache.name()
  }

  pub fn network(&self) -> Arc<N> {
    Arc::clone(&self.network)
  }

  /// Dispatch a single event to its handler.
  pub async fn handle(&self, event: Event) -> Result<Outcome> {
    match event {
      Event::Install => self
        .install(&self.config.install.precache)
        .await
        .map(Outcome::Installed),
      Event::Activate => self.activate().await.map(Outcome::Activated),
      Event::Fetch(request) => Ok(Outcome::Fetched(self.fetch(&request).await)),
      Event::Sync(tag) => self.sync(&tag).await.map(Outcome::Synced),
      Event::Message(message) => self.message(message).await.map(Outcome::Messaged),
    }
  }

  /// Create the current store and seed it with `urls`.
  pub async fn install(&self, urls: &[String]) -> Result<InstallOutcome> {
    info!(version = self.version(), policy = ?self.config.install.policy, "Installing");
    self.cache.open()?;

    let mut skipped = Vec::new();
    let cached = match self.config.install.policy {
      InstallPolicy::Strict => {
        self.cache_all(urls).await?;
        urls.to_vec()
      }
      InstallPolicy::Staged => {
        let critical = &self.config.install.critical;
        self.cache_all(critical).await?;

        let rest: Vec<&String> = urls.iter().filter(|u| !critical.contains(u)).collect();
        let results = join_all(rest.iter().map(|url| self.cache_url(url))).await;

        let mut cached = critical.clone();
        for (url, result) in rest.into_iter().zip(results) {
          match result {
            Ok(()) => cached.push(url.clone()),
            Err(e) => {
              warn!(%url, "Skipping optional precache entry: {e}");
              skipped.push(url.clone());
            }
          }
        }
        cached
      }
    };

    info!(version = self.version(), cached = cached.len(), "Installed");
    Ok(InstallOutcome {
      version: self.version().to_string(),
      cached,
      skipped,
      skip_waiting: true,
    })
  }

  /// Delete every store of this origin that does not belong to the current version.
  pub async fn activate(&self) -> Result<ActivateOutcome> {
    let mut deleted = Vec::new();

    for name in self.cache.store_names()? {
      if name == self.version() {
        continue;
      }
      if self.cache.delete_store(&name)? {
        info!(store = %name, "Deleted stale cache");
        deleted.push(name);
      }
    }

    info!(version = self.version(), "Activated");
    Ok(ActivateOutcome {
      version: self.version().to_string(),
      deleted,
      claim_clients: true,
    })
  }

  /// Answer an intercepted request. Never fails.
  pub async fn fetch(&self, request: &Request) -> FetchOutcome {
    let route = route::classify(request, &self.config);
    debug!(url = %request.url, ?route, "Routing request");

    match route {
      Route::Passthrough(reason) => FetchOutcome::Passthrough(reason),
      Route::Navigation => FetchOutcome::Respond(self.serve_navigation(request).await),
      Route::Api => FetchOutcome::Respond(self.serve_api(request).await),
      Route::Static(kind) => FetchOutcome::Respond(self.serve_static(request, kind).await),
    }
  }

  pub async fn sync(&self, tag: &str) -> Result<SyncOutcome> {
    if tag != SYNC_INCIDENTS_TAG {
      debug!(tag, "Ignoring unknown sync tag");
      return Ok(SyncOutcome::Ignored);
    }
    sync_pending_incidents().await?;
    Ok(SyncOutcome::Completed)
  }

  pub async fn message(&self, message: ClientMessage) -> Result<MessageOutcome> {
    match message {
      ClientMessage::SkipWaiting => Ok(MessageOutcome::SkipWaiting),
      ClientMessage::CacheUrls { urls } => {
        self.cache.open()?;
        self.cache_all(&urls).await?;
        info!(count = urls.len(), "Cached URLs on request");
        Ok(MessageOutcome::Broadcast(ClientNotification::CacheComplete {
          urls,
        }))
      }
    }
  }

  async fn serve_navigation(&self, request: &Request) -> CacheResult<Response> {
    let key = request.key();
    if let Some(result) = self
      .cache
      .network_first(&key, true, || self.network.fetch(request))
      .await
    {
      return result;
    }

    if let Some(cached) = self.cache.lookup(&RequestKey::get(&self.offline_url)) {
      return CacheResult::offline_page(cached.response, cached.cached_at);
    }

    CacheResult::synthesized(fallback::offline_document())
  }

  async fn serve_api(&self, request: &Request) -> CacheResult<Response> {
    self
      .cache
      .network_first(&request.key(), false, || self.network.fetch(request))
      .await
      .unwrap_or_else(|| CacheResult::synthesized(fallback::api_offline()))
  }

  async fn serve_static(&self, request: &Request, kind: AssetKind) -> CacheResult<Response> {
    self
      .cache
      .cache_first(&request.key(), || self.network.fetch(request))
      .await
      .unwrap_or_else(|| CacheResult::synthesized(fallback::asset_placeholder(kind)))
  }

  /// Fetch every URL, then store them all. Any failure leaves the store untouched.
  async fn cache_all(&self, urls: &[String]) -> Result<()> {
    let fetched = try_join_all(urls.iter().map(|url| self.fetch_ok(url))).await?;
    for (key, response) in &fetched {
      self.cache.put(key, response)?;
    }
    Ok(())
  }

  async fn cache_url(&self, url: &str) -> Result<()> {
    let (key, response) = self.fetch_ok(url).await?;
    self.cache.put(&key, &response)
  }

  /// Fetch a URL for precaching, treating non-2xx statuses as failures.
  async fn fetch_ok(&self, url: &str) -> Result<(RequestKey, Response)> {
    let request = Request::get(self.config.resolve(url)?);
    let response = self.network.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!(
        "Request for {} failed with status {}",
        request.url,
        response.status
      ));
    }
    Ok((request.key(), response))
  }
}

impl<S: CacheStorage, N: Network> Clone for OfflineController<S, N> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      offline_url: self.offline_url.clone(),
      cache: self.cache.clone(),
      network: Arc::clone(&self.network),
    }
  }
}
