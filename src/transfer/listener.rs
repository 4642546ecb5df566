use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use crate::network::{spawn_accept_loop, AcceptorHandle};
use crate::storage::SharedFiles;
use crate::transfer::wire::{self, ResponseHeader};
use crate::utils::{MetricsCollector, NodeUtils, P2PError, Result};

/// How long a connection may sit silent before sending its request line.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves files from the shared directory to other peers, one request per
/// connection.
pub struct TransferListener {
    listener: TcpListener,
    shared: SharedFiles,
    metrics: MetricsCollector,
}

impl TransferListener {
    pub fn bind(addr: SocketAddr, shared: SharedFiles, metrics: MetricsCollector) -> Result<Self> {
        let listener = NodeUtils::bind_reusable_tcp_listener(addr)?;
        Ok(Self {
            listener,
            shared,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> Result<AcceptorHandle> {
        let local_addr = self.local_addr()?;
        info!(
            "Serving {:?} for direct transfers on {}",
            self.shared.root(),
            local_addr
        );

        let shared = self.shared;
        let metrics = self.metrics;
        Ok(spawn_accept_loop(
            "transfer listener",
            self.listener,
            local_addr,
            move |stream, addr| {
                let shared = shared.clone();
                let metrics = metrics.clone();
                async move {
                    if let Err(e) = serve(stream, addr, shared, metrics).await {
                        warn!("Transfer to {} failed: {}", addr, e);
                    }
                }
            },
        ))
    }
}

/// Answer a single request, then close.
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    shared: SharedFiles,
    metrics: MetricsCollector,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let filename = timeout(REQUEST_TIMEOUT, wire::read_request(&mut reader))
        .await
        .map_err(|_| P2PError::TransportError("no request received".to_string()))??;
    debug!("{} requested {:?}", addr, filename);

    let file = match shared.resolve(&filename).await {
        Some(path) => File::open(&path).await.ok(),
        None => None,
    };
    let Some(file) = file else {
        info!("{} asked for {:?}, which is not shared", addr, filename);
        wire::write_header(&mut write_half, ResponseHeader::NotFound).await?;
        metrics.record_not_found().await;
        write_half.shutdown().await?;
        return Ok(());
    };

    let size = file.metadata().await?.len();
    wire::write_header(&mut write_half, ResponseHeader::Size(size)).await?;

    // Never send more than announced, even if the file grows meanwhile.
    let mut body = file.take(size);
    let sent = tokio::io::copy(&mut body, &mut write_half).await?;
    metrics.record_served(sent).await;

    if sent < size {
        warn!(
            "{:?} shrank while sending to {}: {} of {} bytes sent",
            filename, addr, sent, size
        );
    } else {
        info!("Sent {:?} ({} bytes) to {}", filename, sent, addr);
    }
    write_half.shutdown().await?;
    Ok(())
}
