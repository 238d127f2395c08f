//! Bridge to a remote TCP endpoint.

use super::relay::relay;
use super::{close, write_response};
use crate::protocol::{FOUND, NOT_FOUND};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A service reached by dialing a TCP address.
///
/// Every bridge opens a fresh outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkService {
    addr: SocketAddr,
}

impl NetworkService {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(super) async fn bridge(&self, mut client: TcpStream, init_data: Bytes) {
        let backend = match TcpStream::connect(self.addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(backend = %self.addr, error = %e, "Failed to connect to network service");
                write_response(&mut client, NOT_FOUND).await;
                close(client).await;
                return;
            }
        };
        debug!(backend = %self.addr, "Connected to network service");

        write_response(&mut client, FOUND).await;

        let (reader, writer) = backend.into_split();
        relay(client, reader, writer, init_data).await;
        debug!(backend = %self.addr, "Network bridge finished");
    }
}
