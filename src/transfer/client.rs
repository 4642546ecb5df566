use log::{debug, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self as async_fs, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

use crate::network::Transport;
use crate::storage::validate_filename;
use crate::transfer::progress::{TransferProgress, TransferSession};
use crate::transfer::wire::{self, ResponseHeader};
use crate::utils::{MetricsCollector, P2PError, Result};

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a completed fetch.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
    pub average_rate_bytes_per_sec: f64,
}

/// Fetches files directly from other peers into the download directory.
#[derive(Clone)]
pub struct TransferClient {
    download_dir: PathBuf,
    connect_timeout: Duration,
    idle_timeout: Duration,
    metrics: MetricsCollector,
    progress_tx: Arc<watch::Sender<Option<TransferProgress>>>,
}

impl TransferClient {
    pub fn new(download_dir: PathBuf, connect_timeout: Duration) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            download_dir,
            connect_timeout,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            metrics: MetricsCollector::new(),
            progress_tx: Arc::new(progress_tx),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Longest gap tolerated between two reads once connected.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Latest progress of whichever fetch updated last.
    pub fn subscribe(&self) -> watch::Receiver<Option<TransferProgress>> {
        self.progress_tx.subscribe()
    }

    /// Fetch `filename` from the peer listening at `peer`.
    ///
    /// On success the file sits at `download_dir/filename`. On any failure
    /// after the header, the partial file is removed. A `FILE_NOT_FOUND`
    /// reply never creates a file.
    pub async fn fetch(&self, peer: SocketAddr, filename: &str) -> Result<TransferReport> {
        validate_filename(filename)?;

        let stream = match Transport::connect(peer, self.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.metrics.record_connection_failed().await;
                return Err(e);
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        wire::write_request(&mut write_half, filename).await?;
        let header = self
            .within("waiting for header", wire::read_header(&mut reader))
            .await?;

        let total = match header {
            ResponseHeader::NotFound => {
                info!("{} does not have {:?}", peer, filename);
                self.metrics.record_transfer_failed(0).await;
                return Err(P2PError::RemoteFileNotFound(format!(
                    "{} not shared by {}",
                    filename, peer
                )));
            }
            ResponseHeader::Size(total) => total,
        };
        debug!("{} announced {:?} as {} bytes", peer, filename, total);

        async_fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(filename);
        let started_at = Instant::now();
        let mut session = TransferSession::new(filename, started_at);
        session.set_total(total);
        self.progress_tx.send_replace(Some(session.progress()));

        match self.receive_body(&mut reader, &path, &mut session).await {
            Ok(()) => {
                let now = Instant::now();
                let report = TransferReport {
                    filename: filename.to_string(),
                    path,
                    bytes: session.received(),
                    elapsed: session.elapsed(now),
                    average_rate_bytes_per_sec: session.average_rate(now),
                };
                self.metrics.record_transfer_completed(report.bytes).await;
                info!(
                    "Downloaded {:?} from {} ({} bytes in {:.2?})",
                    filename, peer, report.bytes, report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rm) = async_fs::remove_file(&path).await {
                    warn!("Could not remove partial download {:?}: {}", path, rm);
                }
                self.metrics.record_transfer_failed(session.received()).await;
                Err(e)
            }
        }
    }

    /// Stream the body into `path` until the sender closes.
    async fn receive_body<R>(
        &self,
        reader: &mut R,
        path: &Path,
        session: &mut TransferSession,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let total = session.total_bytes().unwrap_or(0);
        let mut file = File::create(path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create {:?}: {}", path, e)))?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let read = timeout(self.idle_timeout, reader.read(&mut buf)).await;
            let n = match read {
                Ok(result) => result?,
                // A sender that keeps the socket open after the last byte is tolerated.
                Err(_) if session.is_complete() => break,
                Err(_) => {
                    return Err(P2PError::TransportError(format!(
                        "stalled after {} of {} bytes",
                        session.received(),
                        total
                    )))
                }
            };
            if n == 0 {
                break;
            }
            if session.received() + n as u64 > total {
                return Err(P2PError::ProtocolError(format!(
                    "sender exceeded announced size of {} bytes",
                    total
                )));
            }

            file.write_all(&buf[..n]).await?;
            if let Some(rate) = session.record_chunk(n, Instant::now()) {
                debug!(
                    "{:.1}% at {:.1} KiB/s",
                    session.fraction() * 100.0,
                    rate / 1024.0
                );
            }
            self.progress_tx.send_replace(Some(session.progress()));
        }

        file.flush().await?;
        file.sync_all().await?;

        if session.received() < total {
            return Err(P2PError::TruncatedTransfer {
                expected: total,
                received: session.received(),
            });
        }
        Ok(())
    }

    async fn within<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        timeout(self.idle_timeout, fut)
            .await
            .map_err(|_| P2PError::TransportError(format!("timed out {}", what)))?
    }
}
