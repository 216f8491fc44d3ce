//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently: read a query, resolve
//! it, write the reply, repeat until the client goes away or stays idle.
//! TCP DNS messages are prefixed with a 2-byte length.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::resolver::Resolver;

use super::{Protocol, handle_packet};

/// How long a connection may sit idle between queries.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP transport for the forwarder.
///
/// Binds to a local address and accepts connections from clients.
/// Each connection is handled in a separate task.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener for the transport.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop.
    pub fn start(self, resolver: Arc<Resolver>) -> JoinHandle<()> {
        tokio::spawn(run_accept_loop(self.listener, resolver))
    }
}

/// Accept loop - spawns a handler task for each incoming connection.
async fn run_accept_loop(listener: TcpListener, resolver: Arc<Resolver>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::spawn(handle_connection(client, peer, Arc::clone(&resolver)));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept error");
            }
        }
    }
}

async fn handle_connection(mut client: TcpStream, peer: SocketAddr, resolver: Arc<Resolver>) {
    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_dns_message(&mut client)).await {
            Ok(Ok(query)) => query,
            Ok(Err(_)) | Err(_) => return,
        };

        let Some(reply) = handle_packet(&resolver, &query, Protocol::Tcp).await else {
            return;
        };

        if let Err(e) = write_dns_message(&mut client, &reply).await {
            debug!(client = %peer, error = %e, "TCP write error");
            return;
        }
    }
}

/// Read one length-prefixed DNS message, returning it without the prefix.
pub async fn read_dns_message<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;

    let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write one DNS message with its length prefix.
pub async fn write_dns_message<S: AsyncWrite + Unpin>(stream: &mut S, message: &[u8]) -> io::Result<()> {
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message exceeds 65535 bytes"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await
}
