//! UDP transport for DNS queries.
//!
//! One receive loop; every datagram is resolved in its own task so a slow
//! upstream exchange never holds up other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dns::HEADER_LEN;
use crate::resolver::Resolver;

use super::{MAX_DNS_PACKET_SIZE, Protocol, handle_packet};

/// UDP transport for the forwarder.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop.
    pub fn start(self, resolver: Arc<Resolver>) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, resolver))
    }
}

async fn run(socket: Arc<UdpSocket>, resolver: Arc<Resolver>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < HEADER_LEN {
            continue;
        }

        // The task owns its copy; `buf` is reused for the next datagram.
        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let resolver = Arc::clone(&resolver);

        tokio::spawn(async move {
            let Some(reply) = handle_packet(&resolver, &packet, Protocol::Udp).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, src).await {
                warn!(client = %src, error = %e, "UDP response error");
            }
        });
    }
}
