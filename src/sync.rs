//! Background sync.

use color_eyre::Result;
use tracing::debug;

/// Sync tag under which pages register pending incident uploads.
pub const SYNC_INCIDENTS_TAG: &str = "sync-incidents";

/// Upload incidents queued while offline.
///
/// Nothing is queued yet, so this resolves immediately.
pub async fn sync_pending_incidents() -> Result<()> {
  debug!("No pending incidents to sync");
  Ok(())
}
