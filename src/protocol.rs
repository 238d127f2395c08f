//! TCPMUX wire protocol (RFC 1078).
//!
//! A client opens a connection and sends the name of the service it wants:
//!
//! ```text
//! Request:   <service name>\r\n<optional data for the service>
//! Found:     +\r\n<bytes relayed from the service>
//! Not found: -Service not found\r\n
//! Help:      HELP\r\n<NAME>\r\n<NAME>\r\n...
//! ```
//!
//! Service names are case-insensitive; the reader upper-cases them.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Size of each read while scanning for the service name.
const READ_CHUNK_SIZE: usize = 128;

/// Name of the pseudo-service that lists the directory.
pub const HELP: &str = "HELP";

/// Positive response, sent before relaying starts.
pub const FOUND: &[u8] = b"+\r\n";

/// Negative response.
pub const NOT_FOUND: &[u8] = b"-Service not found\r\n";

/// A parsed service request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRequest {
    /// Upper-cased service name, without the CRLF.
    pub name: String,
    /// Bytes received after the CRLF, to be replayed to the backend.
    pub init_data: Bytes,
}

/// Read the service request from a freshly accepted connection.
///
/// Never fails: if the stream errors or closes before a CRLF shows up the
/// request has an empty name, which matches no configured service.
pub async fn recv_service_descriptor<R>(conn: &mut R) -> ServiceRequest
where
    R: AsyncRead + Unpin,
{
    match read_service_request(conn).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Failed to read service request");
            ServiceRequest::default()
        }
    }
}

/// Accumulate bytes until the first CRLF and split the buffer around it.
///
/// There is no limit on how much a client may send before the delimiter.
pub async fn read_service_request<R>(conn: &mut R) -> std::io::Result<ServiceRequest>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut scanned = 0;

    loop {
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before service name was complete",
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);

        // A CR at the end of the previous chunk may pair with an LF in this one
        if let Some(pos) = find_crlf(&buffer[scanned..]).map(|p| p + scanned) {
            let name = buffer.split_to(pos);
            buffer.advance(2);
            let request = ServiceRequest {
                name: String::from_utf8_lossy(&name).to_uppercase(),
                init_data: buffer.freeze(),
            };
            trace!(
                service = %request.name,
                init_len = request.init_data.len(),
                "Received service request"
            );
            return Ok(request);
        }
        scanned = buffer.len().saturating_sub(1);
    }
}

/// Build the response to the `HELP` pseudo-service.
pub fn help_response<'a, I>(names: I) -> BytesMut
where
    I: IntoIterator<Item = &'a str>,
{
    let mut response = BytesMut::new();
    response.extend_from_slice(HELP.as_bytes());
    response.extend_from_slice(b"\r\n");
    for name in names {
        response.extend_from_slice(name.as_bytes());
        response.extend_from_slice(b"\r\n");
    }
    response
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}
