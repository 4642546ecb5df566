//! Peer Tracker
//!
//! A central presence and discovery tracker plus direct peer-to-peer file
//! transfer. Peers register and heartbeat with the tracker, advertise the
//! files they share, and fetch bytes straight from each other.

pub mod core;
pub mod network;
pub mod storage;
pub mod tracker;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use core::{FileAdvertisement, PeerConfig, PeerNode, TrackerConfig};
pub use tracker::{MemoryStore, SqliteStore, TrackerClient, TrackerServer, TrackerService};
pub use transfer::{TransferClient, TransferListener, TransferProgress, TransferReport};
pub use utils::{
    NodeUtils,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
