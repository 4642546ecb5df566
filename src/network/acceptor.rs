use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Handle to a running accept loop. Dropping it aborts the loop.
pub struct AcceptorHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AcceptorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already being served run to completion.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accept connections until shut down, serving each on its own task so a
/// slow connection never stalls the loop or its siblings.
pub fn spawn_accept_loop<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: F,
) -> AcceptorHandle
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("{} on {} shutting down", name, local_addr);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handler(stream, addr));
                    }
                    Err(e) => {
                        error!("{} failed to accept connection: {}", name, e);
                        sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
    });

    AcceptorHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_serves_connections_concurrently() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut handle = spawn_accept_loop("echo", listener, addr, |mut stream, _| async move {
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        });

        // A silent client must not block the next one.
        let _idle = TcpStream::connect(addr).await.unwrap();
        let mut active = TcpStream::connect(addr).await.unwrap();
        active.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        active.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        handle.shutdown().await;
    }
}
