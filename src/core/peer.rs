use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::utils::Credential;

/// A peer known to the tracker, keyed by `username`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub username: String,
    pub credential: Credential,
    pub address: SocketAddr,
    pub last_seen: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl PeerRecord {
    pub fn new(
        username: String,
        credential: Credential,
        address: SocketAddr,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            username,
            credential,
            address,
            last_seen: now,
            last_heartbeat: now,
        }
    }

    /// `now - last_heartbeat <= staleness`.
    pub fn is_live(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.last_heartbeat <= staleness
    }
}

/// "`owner` currently offers `filename` at `address`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAdvertisement {
    pub filename: String,
    pub owner: String,
    pub address: SocketAddr,
    pub shared_time: DateTime<Utc>,
}

impl FileAdvertisement {
    pub fn matches(&self, filename_filter: &str, owner_filter: &str) -> bool {
        self.filename.contains(filename_filter) && self.owner.contains(owner_filter)
    }
}
