pub mod client;
pub mod directory;
pub mod file_index;
pub mod liveness;
pub mod locks;
pub mod server;
pub mod service;
pub mod store;

pub use client::TrackerClient;
pub use directory::PeerDirectory;
pub use file_index::FileIndex;
pub use liveness::LivenessMonitor;
pub use locks::PeerLocks;
pub use server::TrackerServer;
pub use service::TrackerService;
pub use store::{MemoryStore, SqliteStore, TrackerStore};
