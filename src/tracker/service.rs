use chrono::Duration;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::protocol::{TrackerRequest, TrackerResponse};
use crate::core::{FileAdvertisement, TrackerConfig};
use crate::storage::validate_filename;
use crate::tracker::directory::PeerDirectory;
use crate::tracker::file_index::FileIndex;
use crate::tracker::liveness::LivenessMonitor;
use crate::tracker::locks::PeerLocks;
use crate::tracker::store::TrackerStore;
use crate::utils::{Clock, P2PError, RecurringTask, Result};

const MAX_USERNAME_LEN: usize = 64;

/// The tracker's system of record: registration, liveness, publishing and search.
///
/// All mutations for one username run under that username's lock; the
/// liveness sweep takes the same lock before evicting.
pub struct TrackerService {
    directory: Arc<PeerDirectory>,
    files: Arc<FileIndex>,
    locks: Arc<PeerLocks>,
    monitor: Arc<LivenessMonitor>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
}

impl TrackerService {
    pub fn new(store: Arc<dyn TrackerStore>, clock: Arc<dyn Clock>, staleness: Duration) -> Self {
        let directory = Arc::new(PeerDirectory::new(store.clone(), clock.clone()));
        let files = Arc::new(FileIndex::new(store, clock.clone()));
        let locks = Arc::new(PeerLocks::new());
        let monitor = Arc::new(LivenessMonitor::new(
            directory.clone(),
            files.clone(),
            locks.clone(),
            clock.clone(),
            staleness,
        ));

        Self {
            directory,
            files,
            locks,
            monitor,
            clock,
            staleness,
        }
    }

    pub fn from_config(store: Arc<dyn TrackerStore>, clock: Arc<dyn Clock>, config: &TrackerConfig) -> Self {
        Self::new(store, clock, config.staleness_window())
    }

    pub fn liveness(&self) -> Arc<LivenessMonitor> {
        self.monitor.clone()
    }

    pub fn start_liveness_monitor(&self, period: std::time::Duration) -> RecurringTask {
        self.monitor.clone().start(period)
    }

    pub async fn register(&self, username: &str, password: &str, address: SocketAddr) -> Result<()> {
        validate_username(username)?;
        validate_password(password)?;
        validate_address(address)?;

        let _guard = self.locks.lock(username).await;
        self.directory.register(username, password, address).await
    }

    pub async fn login(&self, username: &str, password: &str, address: SocketAddr) -> Result<String> {
        validate_username(username)?;
        validate_password(password)?;
        validate_address(address)?;

        let _guard = self.locks.lock(username).await;
        let peer = self.directory.authenticate(username, password).await?;
        self.directory.touch_login(username, address).await?;
        info!("Peer {} logged in from {}", username, address);
        Ok(peer.username)
    }

    pub async fn heartbeat(&self, username: &str, address: SocketAddr) -> Result<()> {
        validate_username(username)?;
        validate_address(address)?;

        let _guard = self.locks.lock(username).await;
        self.directory.touch_heartbeat(username, address).await
    }

    /// Drop the peer and its advertisements. Succeeds if it was already gone.
    pub async fn disconnect(&self, username: &str) -> Result<()> {
        validate_username(username)?;

        let _guard = self.locks.lock(username).await;
        let dropped = self.files.remove_all(username).await?;
        match self.directory.remove(username).await {
            Ok(()) => info!("Peer {} disconnected ({} advertisements dropped)", username, dropped),
            Err(P2PError::NotFound(_)) => debug!("Disconnect for absent peer {}", username),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Replace everything `username` advertises.
    pub async fn publish(&self, username: &str, filenames: &[String], address: SocketAddr) -> Result<()> {
        validate_username(username)?;
        validate_address(address)?;
        for name in filenames {
            validate_filename(name)?;
        }

        let _guard = self.locks.lock(username).await;
        // The owner record must exist and carry the address the ads point at.
        self.directory.touch_address(username, address).await?;
        self.files.replace_advertisements(username, filenames, address).await?;
        info!("Peer {} now shares {} files", username, filenames.len());
        Ok(())
    }

    /// Query and search share this one path. Liveness is judged now, not cached.
    pub async fn query(&self, filename: Option<&str>, owner: Option<&str>) -> Result<Vec<FileAdvertisement>> {
        let now = self.clock.now();
        let live: HashSet<String> = self
            .directory
            .live_usernames(now, self.staleness)
            .await?
            .into_iter()
            .collect();

        let results = self
            .files
            .search(filename.unwrap_or(""), owner.unwrap_or(""), &live)
            .await?;
        debug!(
            "Query filename={:?} owner={:?} -> {} results",
            filename,
            owner,
            results.len()
        );
        Ok(results)
    }

    /// Dispatch one wire request. Failures become structured error responses.
    pub async fn handle(&self, request: TrackerRequest) -> TrackerResponse {
        let op = request.op_name();
        let outcome = match request {
            TrackerRequest::Register {
                username,
                password,
                address,
            } => self
                .register(&username, &password, address)
                .await
                .map(|()| TrackerResponse::ok("Registration successful")),
            TrackerRequest::Login {
                username,
                password,
                address,
            } => self
                .login(&username, &password, address)
                .await
                .map(|username| TrackerResponse::LoggedIn { username }),
            TrackerRequest::Heartbeat { username, address } => self
                .heartbeat(&username, address)
                .await
                .map(|()| TrackerResponse::ok("Heartbeat received")),
            TrackerRequest::Disconnect { username } => self
                .disconnect(&username)
                .await
                .map(|()| TrackerResponse::ok("Disconnected")),
            TrackerRequest::Publish {
                username,
                filenames,
                address,
            } => self
                .publish(&username, &filenames, address)
                .await
                .map(|()| TrackerResponse::ok("Files shared")),
            TrackerRequest::Query { filename, username } => self
                .query(filename.as_deref(), username.as_deref())
                .await
                .map(|files| TrackerResponse::Files { files }),
        };

        match outcome {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    P2PError::NotFound(_) | P2PError::Conflict(_) | P2PError::ValidationError(_) => {
                        debug!("{} rejected: {}", op, e)
                    }
                    P2PError::BadCredential(_) => info!("{} rejected: {}", op, e),
                    _ => warn!("{} failed: {}", op, e),
                }
                TrackerResponse::error(&e)
            }
        }
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(P2PError::ValidationError("username is required".to_string()));
    }
    if username.len() > MAX_USERNAME_LEN || username.chars().any(char::is_control) {
        return Err(P2PError::ValidationError(format!(
            "invalid username '{}'",
            username.escape_debug()
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(P2PError::ValidationError("password is required".to_string()));
    }
    Ok(())
}

fn validate_address(address: SocketAddr) -> Result<()> {
    if address.port() == 0 || address.ip().is_unspecified() {
        return Err(P2PError::ValidationError(format!(
            "address {} is not dialable",
            address
        )));
    }
    Ok(())
}
