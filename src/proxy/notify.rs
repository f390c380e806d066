//! List-changed notifications for connected MCP clients.
//!
//! Watches the dispatch table revision. After each change (with a 100ms
//! debounce so a burst of mutations yields one notification), every stored
//! peer receives tools-list-changed and prompts-list-changed. Peers whose
//! transport has closed are pruned on notification error.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::server::Peers;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Forward dispatch table changes to `peers` until `cancel` fires or the
/// registry is dropped.
pub async fn run_change_notifier(
    mut revisions: watch::Receiver<u64>,
    peers: Peers,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    tracing::debug!("dispatch table dropped, change notifier exiting");
                    return;
                }
                tokio::time::sleep(DEBOUNCE).await;
                let revision = *revisions.borrow_and_update();
                let notified = notify_peers(&peers).await;
                tracing::debug!(revision, peers = notified, "sent list-changed notifications");
            }
            _ = cancel.cancelled() => {
                tracing::debug!("change notifier cancelled");
                return;
            }
        }
    }
}

/// Notify every peer; returns how many are still live.
async fn notify_peers(peers: &Peers) -> usize {
    let mut peers = peers.lock().await;
    let mut live_peers = Vec::with_capacity(peers.len());
    for peer in peers.drain(..) {
        let result = match peer.notify_tool_list_changed().await {
            Ok(()) => peer.notify_prompt_list_changed().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => live_peers.push(peer),
            Err(e) => {
                tracing::debug!(error = %e, "pruning stale peer after list-changed error");
            }
        }
    }
    *peers = live_peers;
    peers.len()
}
