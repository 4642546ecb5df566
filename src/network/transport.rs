use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::utils::{P2PError, Result};

/// Length-prefixed JSON framing used by the tracker RPC.
///
/// Each frame is a big-endian `u32` byte count followed by that many bytes.
pub struct Transport;

impl Transport {
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::TransportError(format!("Connection to {} timed out", addr)))?
            .map_err(|e| P2PError::TransportError(format!("Failed to connect to {}: {}", addr, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::TransportError(format!("Failed to set TCP_NODELAY: {}", e)))?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn send_data<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let len = u32::try_from(data.len()).map_err(|_| P2PError::MessageTooLarge(data.len()))?;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
    pub async fn receive_data<R>(stream: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let len = match stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(Some(buffer))
    }

    pub async fn send_json<W, T>(stream: &mut W, value: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let serialized = serde_json::to_vec(value)?;
        Self::send_data(stream, &serialized).await
    }

    pub async fn receive_json<R, T>(stream: &mut R, max_size: usize) -> Result<Option<T>>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        match Self::receive_data(stream, max_size).await? {
            Some(buffer) => Ok(Some(serde_json::from_slice(&buffer)?)),
            None => Ok(None),
        }
    }
}
