use chrono::Duration;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::tracker::directory::PeerDirectory;
use crate::tracker::file_index::FileIndex;
use crate::tracker::locks::PeerLocks;
use crate::utils::{Clock, P2PError, RecurringTask, Result};

/// Evicts peers whose last heartbeat is older than the staleness window,
/// together with everything they advertise.
///
/// Evicted peers are not told; their files just stop showing up and their
/// next tracker call fails with `NotFound`.
pub struct LivenessMonitor {
    directory: Arc<PeerDirectory>,
    files: Arc<FileIndex>,
    locks: Arc<PeerLocks>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
}

impl LivenessMonitor {
    pub fn new(
        directory: Arc<PeerDirectory>,
        files: Arc<FileIndex>,
        locks: Arc<PeerLocks>,
        clock: Arc<dyn Clock>,
        staleness: Duration,
    ) -> Self {
        Self {
            directory,
            files,
            locks,
            clock,
            staleness,
        }
    }

    /// One sweep. Returns the usernames that were evicted.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let threshold = self.clock.now() - self.staleness;
        let candidates = self.directory.stale_usernames(threshold).await?;
        let mut evicted = Vec::with_capacity(candidates.len());

        for username in candidates {
            let _guard = self.locks.lock(&username).await;

            // A heartbeat or disconnect may have landed while we waited.
            match self.directory.get(&username).await {
                Ok(peer) if peer.last_heartbeat < threshold => {}
                Ok(_) | Err(P2PError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }

            let dropped = self.files.remove_all(&username).await?;
            match self.directory.remove(&username).await {
                Ok(()) | Err(P2PError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            info!(
                "Evicted inactive peer {} ({} advertisements dropped)",
                username, dropped
            );
            evicted.push(username);
        }

        self.locks.prune().await;
        debug!("Liveness sweep done, {} evicted", evicted.len());
        Ok(evicted)
    }

    /// Run [`sweep`](Self::sweep) every `period` until the returned task is stopped.
    pub fn start(self: Arc<Self>, period: std::time::Duration) -> RecurringTask {
        RecurringTask::spawn("liveness-sweep", period, move || {
            let monitor = self.clone();
            async move {
                if let Err(e) = monitor.sweep().await {
                    warn!("Liveness sweep failed: {}", e);
                }
            }
        })
    }
}
