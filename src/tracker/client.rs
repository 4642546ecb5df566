use log::debug;
use std::net::SocketAddr;
use tokio::time::{timeout, Duration};

use crate::core::protocol::{Message, TrackerRequest, TrackerResponse};
use crate::core::FileAdvertisement;
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Peer-side stub for the tracker RPC. Each call uses a fresh connection,
/// so a tracker restart or dropped socket only affects the call in flight.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    tracker_addr: SocketAddr,
    request_timeout: Duration,
    max_message_size: usize,
}

impl TrackerClient {
    pub fn new(tracker_addr: SocketAddr, request_timeout: Duration, max_message_size: usize) -> Self {
        Self {
            tracker_addr,
            request_timeout,
            max_message_size,
        }
    }

    pub fn tracker_addr(&self) -> SocketAddr {
        self.tracker_addr
    }

    pub async fn register(&self, username: &str, password: &str, address: SocketAddr) -> Result<()> {
        self.expect_ok(TrackerRequest::Register {
            username: username.to_string(),
            password: password.to_string(),
            address,
        })
        .await
    }

    pub async fn login(&self, username: &str, password: &str, address: SocketAddr) -> Result<String> {
        let request = TrackerRequest::Login {
            username: username.to_string(),
            password: password.to_string(),
            address,
        };
        match self.call(request).await? {
            TrackerResponse::LoggedIn { username } => Ok(username),
            other => Err(unexpected("login", &other)),
        }
    }

    pub async fn heartbeat(&self, username: &str, address: SocketAddr) -> Result<()> {
        self.expect_ok(TrackerRequest::Heartbeat {
            username: username.to_string(),
            address,
        })
        .await
    }

    pub async fn disconnect(&self, username: &str) -> Result<()> {
        self.expect_ok(TrackerRequest::Disconnect {
            username: username.to_string(),
        })
        .await
    }

    pub async fn publish(&self, username: &str, filenames: &[String], address: SocketAddr) -> Result<()> {
        self.expect_ok(TrackerRequest::Publish {
            username: username.to_string(),
            filenames: filenames.to_vec(),
            address,
        })
        .await
    }

    pub async fn query(&self, filename: Option<&str>, owner: Option<&str>) -> Result<Vec<FileAdvertisement>> {
        let request = TrackerRequest::Query {
            filename: filename.map(str::to_string),
            username: owner.map(str::to_string),
        };
        match self.call(request).await? {
            TrackerResponse::Files { files } => Ok(files),
            other => Err(unexpected("query", &other)),
        }
    }

    async fn expect_ok(&self, request: TrackerRequest) -> Result<()> {
        let op = request.op_name();
        match self.call(request).await? {
            TrackerResponse::Ok { message } => {
                debug!("{}: {}", op, message);
                Ok(())
            }
            other => Err(unexpected(op, &other)),
        }
    }

    /// One request/response exchange. Error responses come back as `Err`.
    async fn call(&self, request: TrackerRequest) -> Result<TrackerResponse> {
        let op = request.op_name();
        let message = Message::new(request);

        let exchange = async {
            let mut stream = Transport::connect(self.tracker_addr, self.request_timeout).await?;
            Transport::send_json(&mut stream, &message).await?;
            Transport::receive_json::<_, Message<TrackerResponse>>(&mut stream, self.max_message_size)
                .await?
                .ok_or_else(|| {
                    P2PError::TransportError(format!("tracker closed the connection during {}", op))
                })
        };

        let reply = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| P2PError::TransportError(format!("{} timed out", op)))??;

        if reply.id != message.id {
            return Err(P2PError::ProtocolError(format!(
                "reply id {} does not match request {}",
                reply.id, message.id
            )));
        }

        match reply.body {
            TrackerResponse::Error { kind, message } => Err(P2PError::from_remote(kind, message)),
            body => Ok(body),
        }
    }
}

fn unexpected(op: &str, response: &TrackerResponse) -> P2PError {
    P2PError::ProtocolError(format!("unexpected reply to {}: {:?}", op, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::server::TrackerServer;
    use crate::tracker::service::TrackerService;
    use crate::tracker::store::MemoryStore;
    use crate::utils::SystemClock;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn start_tracker() -> (crate::network::AcceptorHandle, TrackerClient) {
        let service = Arc::new(TrackerService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            chrono::Duration::seconds(60),
        ));
        let server = TrackerServer::bind(service, addr(0), 1024 * 1024).unwrap();
        let handle = server.start().unwrap();
        let client = TrackerClient::new(handle.local_addr(), Duration::from_secs(5), 1024 * 1024);
        (handle, client)
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let (mut handle, client) = start_tracker().await;

        client.register("alice", "pw1", addr(7001)).await.unwrap();
        assert!(matches!(
            client.register("alice", "pw1", addr(7001)).await,
            Err(P2PError::Conflict(_))
        ));
        assert!(matches!(
            client.login("alice", "wrong", addr(7001)).await,
            Err(P2PError::BadCredential(_))
        ));
        assert_eq!(client.login("alice", "pw1", addr(7001)).await.unwrap(), "alice");
        client.heartbeat("alice", addr(7001)).await.unwrap();
        client
            .publish("alice", &["notes.txt".to_string()], addr(7001))
            .await
            .unwrap();

        let files = client.query(Some("note"), None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].owner, "alice");

        client.disconnect("alice").await.unwrap();
        client.disconnect("alice").await.unwrap();
        assert!(client.query(None, None).await.unwrap().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_tracker_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let client = TrackerClient::new(dead, Duration::from_secs(1), 1024);
        assert!(matches!(
            client.heartbeat("alice", addr(7001)).await,
            Err(P2PError::TransportError(_))
        ));
    }

    #[tokio::test]
    async fn test_server_survives_garbage_frame() {
        let (mut handle, client) = start_tracker().await;

        let mut raw = tokio::net::TcpStream::connect(handle.local_addr()).await.unwrap();
        Transport::send_data(&mut raw, b"not json at all").await.unwrap();
        let reply: Option<Message<TrackerResponse>> =
            Transport::receive_json(&mut raw, 1024).await.unwrap();
        assert!(matches!(
            reply.map(|m| m.body),
            Some(TrackerResponse::Error { .. })
        ));

        // Other clients are unaffected.
        assert!(client.query(None, None).await.unwrap().is_empty());
        handle.shutdown().await;
    }
}
