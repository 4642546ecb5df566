use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per username.
///
/// Every mutation of a peer's record or advertisement set (publish, heartbeat,
/// login, disconnect, eviction) runs under that peer's guard. Different
/// usernames never contend.
#[derive(Default)]
pub struct PeerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub type PeerGuard = OwnedMutexGuard<()>;

impl PeerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, username: &str) -> PeerGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(username.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits on.
    pub async fn prune(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
