//! Bidirectional relay between a client connection and a backend.
//!
//! Each direction closes only the side it writes to:
//! - a detached task copies backend -> client, then shuts the client down
//! - the calling task copies client -> backend, then releases the backend
//!
//! Two drop-fired oneshot signals tie the directions together: when the
//! reverse task closes the client the forward copy stops reading from it, and
//! when the bridge releases the backend the reverse task stops reading from it.

use super::report;
use bytes::Bytes;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::trace;

/// Forward `init_data`, then relay until the client -> backend direction ends.
pub(crate) async fn relay<R, W>(
    client: TcpStream,
    mut backend_reader: R,
    mut backend_writer: W,
    init_data: Bytes,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = backend_writer.write_all(&init_data).await {
        report(&e, "Failed to forward initial data to backend");
        return;
    }

    let (mut client_reader, mut client_writer) = client.into_split();
    let (backend_released, backend_released_rx) = oneshot::channel::<()>();
    let (client_closed, client_closed_rx) = oneshot::channel::<()>();

    // Backend -> client
    tokio::spawn(async move {
        tokio::select! {
            result = io::copy(&mut backend_reader, &mut client_writer) => match result {
                Ok(n) => trace!(bytes = n, "Backend closed its output"),
                Err(e) => report(&e, "Failed to relay backend to client"),
            },
            _ = backend_released_rx => trace!("Backend released"),
        }

        if let Err(e) = client_writer.shutdown().await {
            report(&e, "Failed to close client connection");
        }
        drop(client_writer);
        drop(client_closed);
    });

    // Client -> backend
    tokio::select! {
        result = io::copy(&mut client_reader, &mut backend_writer) => match result {
            Ok(n) => trace!(bytes = n, "Client closed its output"),
            Err(e) => report(&e, "Failed to relay client to backend"),
        },
        _ = client_closed_rx => trace!("Client connection closed"),
    }

    if let Err(e) = backend_writer.shutdown().await {
        report(&e, "Failed to close backend");
    }
    drop(backend_writer);
    drop(backend_released);
}
