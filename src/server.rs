//! TCP server for the multiplexer.
//!
//! Accepts connections, reads the requested service name and either lists
//! the directory, rejects the request or hands the connection to the
//! matching service bridge.

use crate::directory::ServiceDirectory;
use crate::protocol::{self, HELP, NOT_FOUND};
use crate::service::{close, write_response};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listen: SocketAddr,
    directory: Arc<ServiceDirectory>,
}

impl Server {
    /// Create a new server instance
    pub fn new(listen: SocketAddr, directory: ServiceDirectory) -> Self {
        Server {
            listen,
            directory: Arc::new(directory),
        }
    }

    /// Create the listening socket.
    pub fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::from_std(create_listener(self.listen)?)
    }

    /// Bind and accept connections forever.
    ///
    /// Only returns if the listening socket cannot be created.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        info!(
            address = %listener.local_addr()?,
            services = self.directory.len(),
            "Started TCPMUX service"
        );
        if self.directory.is_empty() {
            warn!("No services configured");
        }
        for (name, service) in self.directory.iter() {
            debug!(service = name, backend = %service, "Service available");
        }
        self.serve(listener).await;
        Ok(())
    }

    /// Accept loop. Each connection is handled in its own task; accept
    /// errors are logged and the loop keeps going.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let directory = Arc::clone(&self.directory);
                    tokio::spawn(async move {
                        handle_connection(stream, addr, directory).await;
                        debug!(peer = %addr, "Connection finished");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    directory: Arc<ServiceDirectory>,
) {
    let request = protocol::recv_service_descriptor(&mut stream).await;

    if request.name == HELP {
        trace!(peer = %peer, "Listing services");
        let response = protocol::help_response(directory.names());
        write_response(&mut stream, &response).await;
        close(stream).await;
    } else if let Some(service) = directory.get(&request.name) {
        debug!(peer = %peer, service = %request.name, "Bridging service");
        service.bridge(stream, request.init_data).await;
    } else {
        debug!(peer = %peer, service = %request.name, "Service not found");
        write_response(&mut stream, NOT_FOUND).await;
        close(stream).await;
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FOUND;
    use crate::service::{NetworkService, ProcessService, Service};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn start(directory: ServiceDirectory) -> SocketAddr {
        let server = Server::new(SocketAddr::from(([127, 0, 0, 1], 0)), directory);
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    /// Backend that echoes everything it receives.
    async fn echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut rd, mut wr) = socket.into_split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                });
            }
        });
        addr
    }

    fn net(addr: SocketAddr) -> Service {
        Service::Network(NetworkService::new(addr))
    }

    async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(TIMEOUT, stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        timeout(TIMEOUT, stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    async fn request(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        read_to_end(&mut stream).await
    }

    #[tokio::test]
    async fn test_not_found() {
        let backend = echo_backend().await;
        let addr = start([("echo", net(backend))].into_iter().collect()).await;

        assert_eq!(request(addr, b"missing\r\n").await, NOT_FOUND);
        assert_eq!(request(addr, b"\r\n").await, NOT_FOUND);
        assert_eq!(request(addr, b"echo2\r\n").await, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_eof_before_crlf_is_not_found() {
        let addr = start(ServiceDirectory::new()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"half").await.unwrap();
        stream.shutdown().await.unwrap();
        assert_eq!(read_to_end(&mut stream).await, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_help_lists_services() {
        let backend = echo_backend().await;
        let directory = [
            ("time", net(backend)),
            ("echo", net(backend)),
            ("cat", Service::Process(ProcessService::new("cat", Vec::new()))),
        ]
        .into_iter()
        .collect();
        let addr = start(directory).await;

        assert_eq!(
            request(addr, b"help\r\n").await,
            b"HELP\r\nCAT\r\nECHO\r\nTIME\r\n"
        );
    }

    #[tokio::test]
    async fn test_help_empty_directory() {
        let addr = start(ServiceDirectory::new()).await;
        assert_eq!(request(addr, b"HELP\r\n").await, b"HELP\r\n");
    }

    #[tokio::test]
    async fn test_network_echo() {
        let backend = echo_backend().await;
        let addr = start([("echo", net(backend))].into_iter().collect()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"EcHo\r\nABC").await.unwrap();
        assert_eq!(read_n(&mut client, 6).await, b"+\r\nABC");

        client.write_all(b"DEF\r\nGHI").await.unwrap();
        assert_eq!(read_n(&mut client, 8).await, b"DEF\r\nGHI");

        let payload: Vec<u8> = (0..16 * 1024).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();
        assert_eq!(read_n(&mut client, payload.len()).await, payload);

        client.shutdown().await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_closes_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"bye\r\n").await.unwrap();
        });
        let addr = start([("greeter", net(backend))].into_iter().collect()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"greeter\r\n").await.unwrap();
        assert_eq!(read_to_end(&mut client).await, b"+\r\nbye\r\n");
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Grab a free port and release it so nothing listens there
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = unused.local_addr().unwrap();
        drop(unused);

        let addr = start([("down", net(backend))].into_iter().collect()).await;
        assert_eq!(request(addr, b"down\r\nhello").await, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stalled_backend_does_not_block() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let addr = start([("stall", net(backend))].into_iter().collect()).await;

        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"stall\r\nanyone?").await.unwrap();
        assert_eq!(read_n(&mut stalled, FOUND.len()).await, FOUND);

        // Unrelated requests are still served while the bridge is stuck
        assert_eq!(request(addr, b"other\r\n").await, NOT_FOUND);
        assert_eq!(request(addr, b"help\r\n").await, b"HELP\r\nSTALL\r\n");

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"stall\r\n").await.unwrap();
        assert_eq!(read_n(&mut second, FOUND.len()).await, FOUND);
    }

    #[tokio::test]
    async fn test_process_spawn_failure() {
        let directory = [(
            "ghost",
            Service::Process(ProcessService::new(
                "/nonexistent/tcpmux-test-binary",
                Vec::new(),
            )),
        )]
        .into_iter()
        .collect();
        let addr = start(directory).await;

        assert_eq!(request(addr, b"ghost\r\n").await, NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_echo() {
        let directory = [("cat", Service::Process(ProcessService::new("cat", Vec::new())))]
            .into_iter()
            .collect();
        let addr = start(directory).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"cat\r\nABC").await.unwrap();
        assert_eq!(read_n(&mut client, 6).await, b"+\r\nABC");

        client.write_all(b"more data").await.unwrap();
        assert_eq!(read_n(&mut client, 9).await, b"more data");

        client.shutdown().await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[cfg(target_os = "linux")]
    mod process_cleanup {
        use super::*;
        use std::path::PathBuf;

        fn pid_file(name: &str) -> PathBuf {
            std::env::temp_dir().join(format!("tcpmux-test-{}-{}.pid", std::process::id(), name))
        }

        fn read_pid(path: &PathBuf) -> u32 {
            std::fs::read_to_string(path)
                .unwrap()
                .trim()
                .parse()
                .unwrap()
        }

        /// Running and not a zombie
        fn process_alive(pid: u32) -> bool {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => {
                    // The state follows the parenthesised command name
                    let state = stat
                        .rsplit_once(')')
                        .and_then(|(_, rest)| rest.trim_start().chars().next());
                    state != Some('Z')
                }
                Err(_) => false,
            }
        }

        async fn wait_gone(pid: u32) {
            let gone = timeout(TIMEOUT, async {
                while process_alive(pid) {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await;
            assert!(gone.is_ok(), "process {pid} still running");
        }

        async fn bridge_and_close(script: String) {
            let service = ProcessService::new("sh", vec!["-c".to_string(), script]);
            let addr = start([("sh", Service::Process(service))].into_iter().collect()).await;

            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"sh\r\nping").await.unwrap();
            assert_eq!(read_n(&mut client, 7).await, b"+\r\nping");
            drop(client);
        }

        #[tokio::test]
        async fn test_child_reaped_after_client_closes() {
            let path = pid_file("child");
            let script = format!("echo $$ > {}; exec cat", path.display());

            bridge_and_close(script).await;

            let pid = read_pid(&path);
            wait_gone(pid).await;
            let _ = std::fs::remove_file(&path);
        }

        #[tokio::test]
        async fn test_process_group_terminated() {
            let path = pid_file("grandchild");
            let script = format!(
                "sleep 30 >/dev/null & echo $! > {}; exec cat",
                path.display()
            );

            bridge_and_close(script).await;

            let pid = read_pid(&path);
            wait_gone(pid).await;
            let _ = std::fs::remove_file(&path);
        }
    }
}
