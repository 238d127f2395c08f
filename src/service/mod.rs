//! Backends reachable through the multiplexer.
//!
//! A [`Service`] is either a TCP endpoint ([`NetworkService`]) or a local
//! executable talking over stdin/stdout ([`ProcessService`]). Both bridge a
//! client connection to their backend with the shared relay engine.
//!
//! Errors never leave a bridge: they are logged and only the one
//! client/backend pairing is abandoned. A peer closing first shows up as
//! `BrokenPipe` or `NotConnected`; those are expected and not logged.

mod network;
mod process;
mod relay;

pub use network::NetworkService;
pub use process::ProcessService;

use bytes::Bytes;
use std::fmt;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::warn;

/// A configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    /// Remote TCP endpoint (`NET`)
    Network(NetworkService),
    /// Local executable (`LOCAL`)
    Process(ProcessService),
}

impl Service {
    /// Relay bytes between `client` and this service until either side closes.
    ///
    /// `init_data` reaches the backend before anything else the client sends.
    /// The bridge owns the client connection and closes it before returning
    /// or from its reverse-direction task.
    pub async fn bridge(&self, client: TcpStream, init_data: Bytes) {
        match self {
            Service::Network(service) => service.bridge(client, init_data).await,
            Service::Process(service) => service.bridge(client, init_data).await,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Network(service) => write!(f, "NET {}", service.addr()),
            Service::Process(service) => {
                write!(f, "LOCAL {}", service.path().display())?;
                for arg in service.args() {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// Whether an I/O error only means the peer went away first.
pub fn is_expected_shutdown(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    )
}

/// Log an I/O error unless it is an expected shutdown.
pub(crate) fn report(e: &io::Error, context: &str) {
    if !is_expected_shutdown(e) {
        warn!(error = %e, "{}", context);
    }
}

/// Write a protocol response, logging failures.
pub(crate) async fn write_response(stream: &mut TcpStream, response: &[u8]) {
    if let Err(e) = stream.write_all(response).await {
        report(&e, "Failed to write response");
    }
}

/// Shut the connection down and drop it.
pub(crate) async fn close(mut stream: TcpStream) {
    if let Err(e) = stream.shutdown().await {
        report(&e, "Failed to close connection");
    }
}
