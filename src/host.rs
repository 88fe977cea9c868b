//! Host side of the controller: lifecycle, open pages and event dispatch.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage};
use crate::controller::{
  ActivateOutcome, FetchOutcome, InstallOutcome, MessageOutcome, OfflineController, SyncOutcome,
};
use crate::event::{Event, Outcome, TaskQueue};
use crate::http::{Request, Response};
use crate::message::{ClientMessage, ClientNotification};
use crate::network::Network;

/// Lifecycle of a controller version as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  Parsed,
  Installing,
  /// Installed, waiting for activation
  Installed,
  Activating,
  Activated,
  /// Installation failed; this version will never control pages
  Redundant,
}

/// An open page.
pub struct Client {
  id: u64,
  rx: mpsc::UnboundedReceiver<ClientNotification>,
  controlled: Arc<AtomicBool>,
}

impl Client {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Whether the active controller has claimed this page.
  pub fn is_controlled(&self) -> bool {
    self.controlled.load(Ordering::SeqCst)
  }

  /// Wait for the next notification.
  pub async fn recv(&mut self) -> Option<ClientNotification> {
    self.rx.recv().await
  }

  /// Take a pending notification without waiting.
  #[cfg(test)]
  pub fn try_recv(&mut self) -> Option<ClientNotification> {
    self.rx.try_recv().ok()
  }
}

struct ClientSlot {
  id: u64,
  tx: mpsc::UnboundedSender<ClientNotification>,
  controlled: Arc<AtomicBool>,
}

/// Runs one controller version on behalf of a set of pages.
pub struct ServiceHost<N: Network> {
  queue: TaskQueue,
  network: Arc<N>,
  state: Mutex<LifecycleState>,
  clients: Mutex<Vec<ClientSlot>>,
  next_client: AtomicU64,
}

impl<N: Network> ServiceHost<N> {
  /// Host a freshly registered controller. Call `register` to install it.
  pub fn new<S: CacheStorage + 'static>(controller: OfflineController<S, N>) -> Self {
    Self::with_state(controller, LifecycleState::Parsed)
  }

  /// Host a controller whose version was installed and activated earlier.
  pub fn resume<S: CacheStorage + 'static>(controller: OfflineController<S, N>) -> Self {
    Self::with_state(controller, LifecycleState::Activated)
  }

  fn with_state<S: CacheStorage + 'static>(
    controller: OfflineController<S, N>,
    state: LifecycleState,
  ) -> Self {
    let network = controller.network();
    Self {
      queue: TaskQueue::new(controller),
      network,
      state: Mutex::new(state),
      clients: Mutex::new(Vec::new()),
      next_client: AtomicU64::new(1),
    }
  }

  pub fn state(&self) -> Result<LifecycleState> {
    Ok(*self.lock_state()?)
  }

  fn lock_state(&self) -> Result<MutexGuard<'_, LifecycleState>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn lock_clients(&self) -> Result<MutexGuard<'_, Vec<ClientSlot>>> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_state(&self, state: LifecycleState) -> Result<()> {
    let mut current = self.lock_state()?;
    debug!(from = ?*current, to = ?state, "Lifecycle transition");
    *current = state;
    Ok(())
  }

  /// Open a new page. Pages opened after activation start uncontrolled until claimed.
  pub fn open_client(&self) -> Result<Client> {
    let id = self.next_client.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::unbounded_channel();
    let controlled = Arc::new(AtomicBool::new(false));

    self.lock_clients()?.push(ClientSlot {
      id,
      tx,
      controlled: Arc::clone(&controlled),
    });

    Ok(Client { id, rx, controlled })
  }

  /// Number of open pages under the active controller's control.
  #[cfg(test)]
  pub fn controlled_clients(&self) -> Result<usize> {
    Ok(
      self
        .lock_clients()?
        .iter()
        .filter(|c| !c.tx.is_closed() && c.controlled.load(Ordering::SeqCst))
        .count(),
    )
  }

  /// Install the controller and, when it asks to skip waiting, activate it.
  pub async fn register(&self) -> Result<InstallOutcome> {
    self.set_state(LifecycleState::Installing)?;

    let outcome = match self.queue.dispatch(Event::Install).await {
      Ok(Outcome::Installed(outcome)) => outcome,
      Ok(other) => {
        self.set_state(LifecycleState::Redundant)?;
        return Err(eyre!("Unexpected outcome for install: {:?}", other));
      }
      Err(e) => {
        warn!("Installation failed: {e}");
        self.set_state(LifecycleState::Redundant)?;
        return Err(e);
      }
    };
    self.set_state(LifecycleState::Installed)?;

    if outcome.skip_waiting {
      self.activate().await?;
    }
    Ok(outcome)
  }

  /// Activate an installed controller and claim open pages if it asks to.
  pub async fn activate(&self) -> Result<ActivateOutcome> {
    let state = self.state()?;
    if !matches!(state, LifecycleState::Installed | LifecycleState::Activated) {
      return Err(eyre!("Cannot activate from state {:?}", state));
    }
    self.set_state(LifecycleState::Activating)?;

    let outcome = match self.queue.dispatch(Event::Activate).await {
      Ok(Outcome::Activated(outcome)) => outcome,
      Ok(other) => return Err(eyre!("Unexpected outcome for activate: {:?}", other)),
      Err(e) => {
        // Activation failures leave the version installed so it can be retried
        self.set_state(LifecycleState::Installed)?;
        return Err(e);
      }
    };
    self.set_state(LifecycleState::Activated)?;

    if outcome.claim_clients {
      self.claim()?;
    }
    Ok(outcome)
  }

  fn claim(&self) -> Result<()> {
    let clients = self.lock_clients()?;
    for client in clients.iter() {
      client.controlled.store(true, Ordering::SeqCst);
    }
    info!(count = clients.len(), "Claimed clients");
    Ok(())
  }

  /// Issue a request from a page.
  ///
  /// Requests go through the controller once it is active; before that, and
  /// for requests it passes through, the network is used directly.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    if self.state()? != LifecycleState::Activated {
      return self.network_fetch(&request).await;
    }

    match self.queue.dispatch(Event::Fetch(request.clone())).await? {
      Outcome::Fetched(FetchOutcome::Respond(result)) => Ok(result),
      Outcome::Fetched(FetchOutcome::Passthrough(reason)) => {
        debug!(url = %request.url, ?reason, "Passing request through");
        self.network_fetch(&request).await
      }
      other => Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
    }
  }

  async fn network_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    self
      .network
      .fetch(request)
      .await
      .map(CacheResult::from_network)
  }

  /// Fire a background sync for `tag`.
  pub async fn sync(&self, tag: &str) -> Result<SyncOutcome> {
    match self.queue.dispatch(Event::Sync(tag.to_string())).await? {
      Outcome::Synced(outcome) => Ok(outcome),
      other => Err(eyre!("Unexpected outcome for sync: {:?}", other)),
    }
  }

  /// Deliver a page message to the controller and apply its effect.
  pub async fn post_message(&self, message: ClientMessage) -> Result<MessageOutcome> {
    let outcome = match self.queue.dispatch(Event::Message(message)).await? {
      Outcome::Messaged(outcome) => outcome,
      other => return Err(eyre!("Unexpected outcome for message: {:?}", other)),
    };

    match &outcome {
      MessageOutcome::SkipWaiting => {
        if self.state()? == LifecycleState::Installed {
          self.activate().await?;
        }
      }
      MessageOutcome::Broadcast(notification) => {
        self.broadcast(notification)?;
      }
    }
    Ok(outcome)
  }

  /// Send a notification to every open page. Returns how many received it.
  pub fn broadcast(&self, notification: &ClientNotification) -> Result<usize> {
    let mut clients = self.lock_clients()?;
    clients.retain(|client| {
      let delivered = client.tx.send(notification.clone()).is_ok();
      if !delivered {
        debug!(client = client.id, "Dropping closed client");
      }
      delivered
    });
    debug!(count = clients.len(), ?notification, "Broadcast to clients");
    Ok(clients.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::config::Config;
  use crate::http::RequestKey;
  use crate::testing::{controller, origin_url, FakeNetwork};

  fn site() -> FakeNetwork {
    FakeNetwork::new()
      .with_page("/", "home")
      .with_page("/offline", "offline page")
      .with_page("/x", "x")
  }

  #[tokio::test]
  async fn test_register_installs_activates_and_claims() {
    let host = ServiceHost::new(controller(site()));
    let page = host.open_client().unwrap();
    assert_eq!(host.state().unwrap(), LifecycleState::Parsed);
    assert!(!page.is_controlled());

    let outcome = host.register().await.unwrap();

    assert!(outcome.skip_waiting);
    assert_eq!(host.state().unwrap(), LifecycleState::Activated);
    assert!(page.is_controlled());
    assert_eq!(host.controlled_clients().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_failed_install_makes_version_redundant() {
    let network = site();
    network.set_online(false);
    let host = ServiceHost::new(controller(network));

    assert!(host.register().await.is_err());
    assert_eq!(host.state().unwrap(), LifecycleState::Redundant);
    assert!(host.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_upgrade_purges_previous_version() {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let network = Arc::new(site());

    let mut v3 = Config::default();
    v3.cache_version = "wildlife-incident-v3".to_string();
    let old = OfflineController::new(v3, Arc::clone(&storage), Arc::clone(&network)).unwrap();
    ServiceHost::new(old).register().await.unwrap();

    let new = OfflineController::new(Config::default(), Arc::clone(&storage), network).unwrap();
    ServiceHost::new(new).register().await.unwrap();

    let scope = Config::default().storage_scope();
    assert_eq!(storage.keys(&scope).unwrap(), vec!["wildlife-incident-v4"]);
    let home = RequestKey::get(&origin_url("/"));
    assert!(storage
      .match_request(&scope, "wildlife-incident-v4", &home)
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_fetch_never_fails_for_same_origin_get() {
    let network = site();
    let host = ServiceHost::new(controller(network.clone()));
    host.register().await.unwrap();
    network.set_online(false);

    for path in ["/", "/incidents", "/api/statistics", "/static/app.js", "/favicon.ico"] {
      let result = host.fetch(Request::get(origin_url(path))).await;
      assert!(result.is_ok(), "{path}");
      let navigation = host.fetch(Request::navigate(origin_url(path))).await;
      assert!(navigation.is_ok(), "{path}");
    }
  }

  #[tokio::test]
  async fn test_passthrough_uses_network_directly() {
    let network = site();
    let host = ServiceHost::new(controller(network.clone()));
    host.register().await.unwrap();

    let post = Request::get(origin_url("/x")).with_method(reqwest::Method::POST);
    let result = host.fetch(post.clone()).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);

    network.set_online(false);
    assert!(host.fetch(post).await.is_err());
  }

  #[tokio::test]
  async fn test_fetch_before_activation_bypasses_cache() {
    let network = site();
    let host = ServiceHost::new(controller(network.clone()));

    let result = host.fetch(Request::navigate(origin_url("/"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);

    network.set_online(false);
    assert!(host.fetch(Request::navigate(origin_url("/"))).await.is_err());
  }

  #[tokio::test]
  async fn test_cache_urls_notifies_every_page_once() {
    let host = ServiceHost::new(controller(site()));
    host.register().await.unwrap();
    let mut first = host.open_client().unwrap();
    let mut second = host.open_client().unwrap();

    host
      .post_message(ClientMessage::CacheUrls {
        urls: vec!["/x".to_string()],
      })
      .await
      .unwrap();

    let expected = ClientNotification::CacheComplete {
      urls: vec!["/x".to_string()],
    };
    for page in [&mut first, &mut second] {
      assert_eq!(page.try_recv(), Some(expected.clone()));
      assert_eq!(page.try_recv(), None);
    }
  }

  #[tokio::test]
  async fn test_closed_pages_are_dropped_from_broadcast() {
    let host = ServiceHost::new(controller(site()));
    let kept = host.open_client().unwrap();
    let closed = host.open_client().unwrap();
    assert_ne!(kept.id(), closed.id());
    drop(closed);

    let delivered = host
      .broadcast(&ClientNotification::CacheComplete { urls: Vec::new() })
      .unwrap();
    assert_eq!(delivered, 1);
  }

  #[tokio::test]
  async fn test_skip_waiting_message_is_accepted_when_active() {
    let host = ServiceHost::new(controller(site()));
    host.register().await.unwrap();

    let outcome = host.post_message(ClientMessage::SkipWaiting).await.unwrap();
    assert_eq!(outcome, MessageOutcome::SkipWaiting);
    assert_eq!(host.state().unwrap(), LifecycleState::Activated);
  }

  #[tokio::test]
  async fn test_sync_through_host() {
    let host = ServiceHost::resume(controller(site()));
    assert_eq!(host.sync("sync-incidents").await.unwrap(), SyncOutcome::Completed);
  }
}
