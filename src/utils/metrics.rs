use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct TransferMetrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub requests_served: u64,
    pub requests_not_found: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub connections_failed: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            requests_served: 0,
            requests_not_found: 0,
            transfers_completed: 0,
            transfers_failed: 0,
            connections_failed: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

/// Shared counters for the transfer side of a peer. Cheap to clone.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<TransferMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_served(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.requests_served += 1;
        metrics.bytes_sent += bytes;
    }

    pub async fn record_not_found(&self) {
        self.metrics.write().await.requests_not_found += 1;
    }

    pub async fn record_transfer_completed(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.transfers_completed += 1;
        metrics.bytes_received += bytes;
    }

    pub async fn record_transfer_failed(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.transfers_failed += 1;
        metrics.bytes_received += bytes;
    }

    pub async fn record_connection_failed(&self) {
        self.metrics.write().await.connections_failed += 1;
    }

    pub async fn snapshot(&self) -> TransferMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub async fn log_stats(&self) {
        let m = self.snapshot().await;
        info!(
            "Transfer stats after {:.2?}: served {} ({} not found, {} bytes out), \
             fetched {} ok / {} failed ({} bytes in), {} connection failures",
            m.uptime,
            m.requests_served,
            m.requests_not_found,
            m.bytes_sent,
            m.transfers_completed,
            m.transfers_failed,
            m.bytes_received,
            m.connections_failed
        );
    }
}
