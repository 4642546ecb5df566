pub mod clock;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod node_utils;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::Credential;
pub use error::{ErrorKind, P2PError, Result};
pub use logger::setup_logging;
pub use metrics::{MetricsCollector, TransferMetrics};
pub use node_utils::NodeUtils;
pub use scheduler::RecurringTask;
