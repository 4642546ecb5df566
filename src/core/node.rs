use log::{info, warn};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs as async_fs;
use tokio::sync::watch;

use crate::core::config::PeerConfig;
use crate::core::peer::FileAdvertisement;
use crate::network::AcceptorHandle;
use crate::storage::SharedFiles;
use crate::tracker::TrackerClient;
use crate::transfer::{TransferClient, TransferListener, TransferProgress, TransferReport};
use crate::utils::{MetricsCollector, NodeUtils, P2PError, RecurringTask, Result};

/// The peer side: serves the shared directory, keeps the tracker informed
/// and fetches files from other peers.
pub struct PeerNode {
    config: PeerConfig,
    tracker: TrackerClient,
    shared: SharedFiles,
    transfers: TransferClient,
    metrics: MetricsCollector,
    listener: Option<AcceptorHandle>,
    advertised: Option<SocketAddr>,
    username: Option<String>,
    heartbeat: Option<RecurringTask>,
}

impl PeerNode {
    pub async fn new(config: PeerConfig) -> Result<Self> {
        config.validate()?;

        let shared = SharedFiles::new(config.shared_dir.clone()).await?;
        async_fs::create_dir_all(&config.download_dir)
            .await
            .map_err(|e| {
                P2PError::IoError(format!("Failed to create {:?}: {}", config.download_dir, e))
            })?;

        let metrics = MetricsCollector::new();
        let tracker = TrackerClient::new(
            config.tracker_addr,
            config.request_timeout(),
            config.max_message_size,
        );
        let transfers = TransferClient::new(config.download_dir.clone(), config.request_timeout())
            .with_metrics(metrics.clone());

        Ok(Self {
            config,
            tracker,
            shared,
            transfers,
            metrics,
            listener: None,
            advertised: None,
            username: None,
            heartbeat: None,
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn shared(&self) -> &SharedFiles {
        &self.shared
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn advertised_address(&self) -> Option<SocketAddr> {
        self.advertised
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<TransferProgress>> {
        self.transfers.subscribe()
    }

    /// Bind the transfer listener if needed and return the address other
    /// peers should dial.
    pub async fn start_listener(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.advertised {
            return Ok(addr);
        }

        let listener = TransferListener::bind(
            self.config.listen_addr,
            self.shared.clone(),
            self.metrics.clone(),
        )?;
        let handle = listener.start()?;
        let advertised = NodeUtils::advertised_address(handle.local_addr(), self.config.advertise_ip);

        info!("Advertising transfer address {}", advertised);
        self.listener = Some(handle);
        self.advertised = Some(advertised);
        Ok(advertised)
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<()> {
        let address = self.start_listener().await?;
        self.tracker.register(username, password, address).await?;
        info!("Registered {} at {}", username, address);
        Ok(())
    }

    /// Log in, start heartbeating and publish the shared directory.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Vec<String>> {
        let address = self.start_listener().await?;
        let username = self.tracker.login(username, password, address).await?;
        info!("Logged in as {}", username);

        self.stop_heartbeat().await;
        let tracker = self.tracker.clone();
        let heartbeat_user = username.clone();
        self.heartbeat = Some(RecurringTask::spawn_detached(
            "heartbeat",
            self.config.heartbeat_interval(),
            move || {
                let tracker = tracker.clone();
                let username = heartbeat_user.clone();
                async move {
                    if let Err(e) = tracker.heartbeat(&username, address).await {
                        warn!("Heartbeat for {} failed: {}", username, e);
                    }
                }
            },
        ));
        self.username = Some(username);

        self.publish_shared().await
    }

    /// Replace this peer's advertisements with the current shared directory.
    pub async fn publish_shared(&self) -> Result<Vec<String>> {
        let (username, address) = self.session()?;
        let files = self.shared.list_files().await?;
        self.tracker.publish(username, &files, address).await?;
        info!("Published {} shared files", files.len());
        Ok(files)
    }

    /// Copy `source` into the shared directory and republish.
    pub async fn share_file(&self, source: &Path) -> Result<String> {
        self.session()?;
        let name = self.shared.import(source).await?;
        self.publish_shared().await?;
        Ok(name)
    }

    pub async fn search(
        &self,
        filename: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<FileAdvertisement>> {
        self.tracker.query(filename, owner).await
    }

    /// Fetch an advertised file straight from its owner.
    pub async fn download(&self, advertisement: &FileAdvertisement) -> Result<TransferReport> {
        info!(
            "Fetching {:?} from {} at {}",
            advertisement.filename, advertisement.owner, advertisement.address
        );
        self.transfers
            .fetch(advertisement.address, &advertisement.filename)
            .await
    }

    /// Stop heartbeating, tell the tracker we are leaving and stop serving.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop_heartbeat().await;

        if let Some(username) = self.username.take() {
            match self.tracker.disconnect(&username).await {
                Ok(()) => info!("Disconnected {} from tracker", username),
                Err(e) => warn!("Disconnect for {} failed: {}", username, e),
            }
        }

        if let Some(mut listener) = self.listener.take() {
            listener.shutdown().await;
        }
        self.advertised = None;
        self.metrics.log_stats().await;
        Ok(())
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(mut task) = self.heartbeat.take() {
            task.stop().await;
        }
    }

    fn session(&self) -> Result<(&str, SocketAddr)> {
        match (self.username.as_deref(), self.advertised) {
            (Some(username), Some(address)) => Ok((username, address)),
            _ => Err(P2PError::ValidationError("not logged in".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> PeerConfig {
        PeerConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            shared_dir: dir.join("shared"),
            download_dir: dir.join("downloads"),
            ..PeerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let node = PeerNode::new(config(dir.path())).await.unwrap();
        assert!(dir.path().join("shared").is_dir());
        assert!(dir.path().join("downloads").is_dir());
        assert!(node.username().is_none());
    }

    #[tokio::test]
    async fn test_publish_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let node = PeerNode::new(config(dir.path())).await.unwrap();
        assert!(matches!(
            node.publish_shared().await,
            Err(P2PError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_listener_is_started_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = PeerNode::new(config(dir.path())).await.unwrap();
        let first = node.start_listener().await.unwrap();
        let second = node.start_listener().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ip(), std::net::IpAddr::from([127, 0, 0, 1]));
        node.shutdown().await.unwrap();
        assert!(node.advertised_address().is_none());
    }
}
