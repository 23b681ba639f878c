//! Connection handling for newly accepted sockets.

use crate::connection::{next_connection_id, transport::split_websocket, Hub};
use crate::error::ServerError;
use crate::server::session::{Session, SessionEnd, SessionSettings};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::info;

/// Upgrades an accepted TCP stream to a WebSocket and runs its session.
///
/// # Arguments
///
/// * `stream` - The accepted TCP stream
/// * `addr` - The client's remote address
/// * `hub` - Handle to the connection hub
/// * `settings` - Mailbox and input handling settings for the session
/// * `shutdown` - Server-wide shutdown signal
///
/// # Returns
///
/// Why the session ended, or a `ServerError::Network` if the WebSocket
/// handshake failed or did not finish within the write timeout.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Hub,
    settings: SessionSettings,
    shutdown: broadcast::Receiver<()>,
) -> Result<SessionEnd, ServerError> {
    let _ = stream.set_nodelay(true);

    let ws_stream = timeout(settings.write_timeout, accept_async(stream))
        .await
        .map_err(|_| {
            ServerError::Network(format!(
                "WebSocket handshake from {addr} timed out after {:?}",
                settings.write_timeout
            ))
        })?
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (writer, reader) = split_websocket(ws_stream);
    let connection_id = next_connection_id();
    info!("🔗 Connection {} established from {}", connection_id, addr);

    let end = Session::new(connection_id, addr, hub, settings)
        .run(reader, writer, shutdown)
        .await;

    info!("Connection {} from {} closed", connection_id, addr);
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_silent_client_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _silent = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, addr) = listener.accept().await.unwrap();

        let (hub, worker) = Hub::new(10);
        tokio::spawn(worker.run());
        let (_shutdown_tx, shutdown) = broadcast::channel(1);
        let settings = SessionSettings {
            write_timeout: Duration::from_millis(100),
            ..SessionSettings::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            handle_connection(stream, addr, hub.clone(), settings, shutdown),
        )
        .await
        .expect("handshake was not bounded");

        assert!(matches!(result, Err(ServerError::Network(_))));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }
}
