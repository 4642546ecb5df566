use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::PeerRecord;
use crate::tracker::store::TrackerStore;
use crate::utils::{Clock, Credential, P2PError, Result};

/// Registered peers: credentials, addresses and liveness timestamps.
pub struct PeerDirectory {
    store: Arc<dyn TrackerStore>,
    clock: Arc<dyn Clock>,
}

impl PeerDirectory {
    pub fn new(store: Arc<dyn TrackerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn register(&self, username: &str, password: &str, address: SocketAddr) -> Result<()> {
        let record = PeerRecord::new(
            username.to_string(),
            Credential::hash(password),
            address,
            self.clock.now(),
        );
        self.store.insert_peer(&record).await?;
        info!("Registered peer {} at {}", username, address);
        Ok(())
    }

    /// `NotFound` and `BadCredential` are kept apart for the caller's benefit.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<PeerRecord> {
        let peer = self.get(username).await?;
        if peer.credential.verify(password) {
            Ok(peer)
        } else {
            Err(P2PError::BadCredential(username.to_string()))
        }
    }

    pub async fn touch_login(&self, username: &str, address: SocketAddr) -> Result<()> {
        let mut peer = self.get(username).await?;
        peer.address = address;
        peer.last_seen = self.clock.now();
        self.save(&peer).await?;
        debug!("Login refreshed {} at {}", username, address);
        Ok(())
    }

    pub async fn touch_heartbeat(&self, username: &str, address: SocketAddr) -> Result<()> {
        let mut peer = self.get(username).await?;
        peer.address = address;
        peer.last_heartbeat = self.clock.now();
        self.save(&peer).await?;
        debug!("Heartbeat from {} at {}", username, address);
        Ok(())
    }

    /// Move the peer to `address` without touching its timestamps.
    pub async fn touch_address(&self, username: &str, address: SocketAddr) -> Result<()> {
        let mut peer = self.get(username).await?;
        if peer.address != address {
            debug!("{} moved from {} to {}", username, peer.address, address);
            peer.address = address;
            self.save(&peer).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, username: &str) -> Result<()> {
        if self.store.delete_peer(username).await? {
            Ok(())
        } else {
            Err(P2PError::NotFound(username.to_string()))
        }
    }

    pub async fn get(&self, username: &str) -> Result<PeerRecord> {
        self.store
            .get_peer(username)
            .await?
            .ok_or_else(|| P2PError::NotFound(username.to_string()))
    }

    pub async fn is_live(&self, username: &str, now: DateTime<Utc>, staleness: Duration) -> Result<bool> {
        Ok(self
            .store
            .get_peer(username)
            .await?
            .map(|peer| peer.is_live(now, staleness))
            .unwrap_or(false))
    }

    pub async fn live_usernames(&self, now: DateTime<Utc>, staleness: Duration) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_peers()
            .await?
            .into_iter()
            .filter(|peer| peer.is_live(now, staleness))
            .map(|peer| peer.username)
            .collect())
    }

    /// Peers whose last heartbeat is strictly older than `threshold`.
    pub async fn stale_usernames(&self, threshold: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_peers()
            .await?
            .into_iter()
            .filter(|peer| peer.last_heartbeat < threshold)
            .map(|peer| peer.username)
            .collect())
    }

    async fn save(&self, peer: &PeerRecord) -> Result<()> {
        if self.store.update_peer(peer).await? {
            Ok(())
        } else {
            Err(P2PError::NotFound(peer.username.clone()))
        }
    }
}
