//! Minimal liveness endpoint for process supervisors.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

/// Answer every connection with a fixed 200. Request bytes are ignored; a
/// supervisor only cares that the process accepts connections.
pub async fn serve(port: u16) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Failed to bind liveness endpoint on port {}: {e}", port);
            return;
        }
    };
    info!("❤️ Liveness endpoint on port {}", port);

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let _ = stream.write_all(RESPONSE).await;
            }
            Err(e) => {
                warn!("Liveness accept failed: {e}");
            }
        }
    }
}
