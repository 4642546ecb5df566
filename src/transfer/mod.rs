pub mod client;
pub mod listener;
pub mod progress;
pub mod wire;

pub use client::{TransferClient, TransferReport};
pub use listener::TransferListener;
pub use progress::{ThroughputMeter, TransferProgress, TransferSession};
