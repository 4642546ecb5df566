use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use crate::core::protocol::{Message, TrackerRequest, TrackerResponse};
use crate::network::{spawn_accept_loop, AcceptorHandle, Transport};
use crate::tracker::service::TrackerService;
use crate::utils::{NodeUtils, P2PError, Result};

/// Accepts tracker RPC connections and feeds each frame to the service.
pub struct TrackerServer {
    service: Arc<TrackerService>,
    listener: TcpListener,
    max_message_size: usize,
}

impl TrackerServer {
    pub fn bind(service: Arc<TrackerService>, addr: SocketAddr, max_message_size: usize) -> Result<Self> {
        let listener = NodeUtils::bind_reusable_tcp_listener(addr)?;
        Ok(Self {
            service,
            listener,
            max_message_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> Result<AcceptorHandle> {
        let local_addr = self.local_addr()?;
        info!("Tracker listening on {}", local_addr);

        let service = self.service;
        let max = self.max_message_size;
        Ok(spawn_accept_loop("tracker", self.listener, local_addr, move |stream, addr| {
            let service = service.clone();
            async move {
                if let Err(e) = Self::handle_connection(stream, addr, service, max).await {
                    warn!("Tracker connection from {} closed: {}", addr, e);
                }
            }
        }))
    }

    /// Serve request/response pairs until the client hangs up.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        service: Arc<TrackerService>,
        max_message_size: usize,
    ) -> Result<()> {
        debug!("Tracker client connected: {}", addr);

        loop {
            let request: Message<TrackerRequest> =
                match Transport::receive_json(&mut stream, max_message_size).await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(P2PError::SerializationError(e)) => {
                        let rejection = P2PError::ValidationError(format!("malformed request: {}", e));
                        let reply = Message::new(TrackerResponse::error(&rejection));
                        let _ = Transport::send_json(&mut stream, &reply).await;
                        return Err(P2PError::ProtocolError(e));
                    }
                    Err(e) => return Err(e),
                };

            let Message { id, body, .. } = request;
            debug!("Request from {}: {:?}", addr, body);
            let response = service.handle(body).await;
            Transport::send_json(&mut stream, &Message::reply_to(id, response)).await?;
        }

        debug!("Tracker client disconnected: {}", addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::store::MemoryStore;
    use crate::utils::{ErrorKind, SystemClock};

    fn start() -> AcceptorHandle {
        let service = Arc::new(TrackerService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            chrono::Duration::seconds(60),
        ));
        TrackerServer::bind(service, SocketAddr::from(([127, 0, 0, 1], 0)), 64 * 1024)
            .unwrap()
            .start()
            .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_only_that_connection() {
        let mut handle = start();

        let mut bad = TcpStream::connect(handle.local_addr()).await.unwrap();
        Transport::send_data(&mut bad, b"{\"op\": \"teleport\"}").await.unwrap();
        let reply: Option<Message<TrackerResponse>> =
            Transport::receive_json(&mut bad, 64 * 1024).await.unwrap();
        match reply.map(|m| m.body) {
            Some(TrackerResponse::Error { kind, .. }) => assert_eq!(kind, ErrorKind::Validation),
            other => panic!("unexpected reply: {:?}", other),
        }
        let after: Option<Vec<u8>> = Transport::receive_data(&mut bad, 64 * 1024).await.unwrap();
        assert!(after.is_none());

        let mut good = TcpStream::connect(handle.local_addr()).await.unwrap();
        let request = Message::new(TrackerRequest::Query {
            filename: None,
            username: None,
        });
        Transport::send_json(&mut good, &request).await.unwrap();
        let reply: Message<TrackerResponse> = Transport::receive_json(&mut good, 64 * 1024)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.body, TrackerResponse::Files { files: Vec::new() });

        // The same connection keeps serving further requests.
        Transport::send_json(&mut good, &Message::new(TrackerRequest::Disconnect {
            username: "nobody".to_string(),
        }))
        .await
        .unwrap();
        let reply: Option<Message<TrackerResponse>> =
            Transport::receive_json(&mut good, 64 * 1024).await.unwrap();
        assert!(matches!(reply.map(|m| m.body), Some(TrackerResponse::Ok { .. })));

        handle.shutdown().await;
    }
}
