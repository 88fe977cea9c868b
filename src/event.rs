use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug_span, Instrument};

use crate::cache::CacheStorage;
use crate::controller::{
  ActivateOutcome, FetchOutcome, InstallOutcome, MessageOutcome, OfflineController, SyncOutcome,
};
use crate::http::Request;
use crate::message::ClientMessage;
use crate::network::Network;

/// Lifecycle and network events delivered to the controller
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  /// Intercepted page request
  Fetch(Request),
  /// Background sync fired for a tag
  Sync(String),
  /// Message posted by a page
  Message(ClientMessage),
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch(_) => "fetch",
      Event::Sync(_) => "sync",
      Event::Message(_) => "message",
    }
  }
}

/// Effect of a handled event, for the host to apply
#[derive(Debug)]
pub enum Outcome {
  Installed(InstallOutcome),
  Activated(ActivateOutcome),
  Fetched(FetchOutcome),
  Synced(SyncOutcome),
  Messaged(MessageOutcome),
}

struct Job {
  event: Event,
  reply: oneshot::Sender<Result<Outcome>>,
}

/// Task queue that runs each event as its own task against a shared controller.
///
/// The host does not proceed past a phase until the future returned by
/// `dispatch` settles.
#[derive(Clone)]
pub struct TaskQueue {
  tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
  /// Spawn the queue worker. Must be called inside a tokio runtime.
  pub fn new<S, N>(controller: OfflineController<S, N>) -> Self
  where
    S: CacheStorage + 'static,
    N: Network,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    tokio::spawn(async move {
      while let Some(job) = rx.recv().await {
        let controller = controller.clone();
        let span = debug_span!("event", name = job.event.name());
        tokio::spawn(
          async move {
            let result = controller.handle(job.event).await;
            // Ignore send errors - the dispatcher may have stopped waiting
            let _ = job.reply.send(result);
          }
          .instrument(span),
        );
      }
    });

    Self { tx }
  }

  /// Queue an event and wait for its handler to settle.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Job { event, reply })
      .map_err(|_| eyre!("Task queue has shut down"))?;

    rx.await
      .map_err(|_| eyre!("Event handler was cancelled"))?
  }
}
