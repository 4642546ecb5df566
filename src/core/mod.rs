pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::{load_config, save_config, PeerConfig, TrackerConfig, DEFAULT_TRACKER_PORT};
pub use node::PeerNode;
pub use peer::{FileAdvertisement, PeerRecord};
pub use protocol::{Message, TrackerRequest, TrackerResponse};
