//! Exchange of queries with the upstream resolver.
//!
//! Each exchange uses its own ephemeral UDP socket, so concurrent queries
//! never share a transaction id space. A truncated UDP answer is retried
//! once over TCP. The whole exchange is bounded by a single timeout.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::error::UpstreamError;
use crate::transport::tcp::{read_dns_message, write_dns_message};

/// Receive buffer for UDP answers (EDNS-sized).
const MAX_UDP_ANSWER_SIZE: usize = 4096;

/// Forwards a query to the upstream resolver and returns its answer.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message, UpstreamError>;

    fn address(&self) -> SocketAddr;
}

/// Plain DNS over UDP, falling back to TCP on truncation.
pub struct UdpUpstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl UdpUpstream {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange_unbounded(&self, query: &Message) -> Result<Message, UpstreamError> {
        let bytes = query.to_vec().map_err(UpstreamError::Encode)?;

        let answer = self.exchange_udp(query.id(), &bytes).await?;
        if !answer.truncated() {
            return Ok(answer);
        }

        debug!(upstream = %self.addr, id = query.id(), "truncated answer, retrying over TCP");
        self.exchange_tcp(&bytes).await
    }

    async fn exchange_udp(&self, id: u16, query: &[u8]) -> Result<Message, UpstreamError> {
        let bind_addr: SocketAddr = if self.addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| self.io(e))?;
        socket.connect(self.addr).await.map_err(|e| self.io(e))?;
        socket.send(query).await.map_err(|e| self.io(e))?;

        let mut buf = vec![0u8; MAX_UDP_ANSWER_SIZE];
        loop {
            let len = socket.recv(&mut buf).await.map_err(|e| self.io(e))?;

            let answer = match Message::from_vec(&buf[..len]) {
                Ok(answer) => answer,
                Err(source) => {
                    return Err(UpstreamError::Decode {
                        addr: self.addr,
                        source,
                    });
                }
            };

            // Stray or spoofed datagram; keep waiting for ours.
            if answer.id() != id {
                debug!(upstream = %self.addr, expected = id, got = answer.id(), "ignoring answer with foreign id");
                continue;
            }

            return Ok(answer);
        }
    }

    /// Send one length-prefixed query over a fresh TCP connection.
    async fn exchange_tcp(&self, query: &[u8]) -> Result<Message, UpstreamError> {
        let mut stream = TcpStream::connect(self.addr).await.map_err(|e| self.io(e))?;

        write_dns_message(&mut stream, query).await.map_err(|e| self.io(e))?;
        let answer = read_dns_message(&mut stream).await.map_err(|e| self.io(e))?;

        Message::from_vec(&answer).map_err(|source| UpstreamError::Decode {
            addr: self.addr,
            source,
        })
    }

    fn io(&self, source: std::io::Error) -> UpstreamError {
        UpstreamError::Io {
            addr: self.addr,
            source,
        }
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message, UpstreamError> {
        match tokio::time::timeout(self.timeout, self.exchange_unbounded(query)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                addr: self.addr,
                timeout: self.timeout,
            }),
        }
    }

    fn address(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{answer_with_ttls, build_query};
    use hickory_proto::rr::RecordType;
    use tokio::net::TcpListener;

    async fn udp_server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn exchange_returns_matching_answer() {
        let (server, addr) = udp_server().await;
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = server.recv_from(&mut buf).await.unwrap();
            let query = Message::from_vec(&buf[..len]).unwrap();

            // A stray datagram with the wrong id is ignored by the client.
            let mut stray = answer_with_ttls(&query, &[1]);
            stray.set_id(query.id().wrapping_add(1));
            server.send_to(&stray.to_vec().unwrap(), src).await.unwrap();

            let answer = answer_with_ttls(&query, &[300]);
            server.send_to(&answer.to_vec().unwrap(), src).await.unwrap();
        });

        let upstream = UdpUpstream::new(addr, Duration::from_secs(2));
        let query = build_query(0x4242, "example.com", RecordType::A).unwrap();

        let answer = upstream.exchange(&query).await.unwrap();

        assert_eq!(answer.id(), 0x4242);
        assert_eq!(answer.answers().len(), 1);
        assert_eq!(answer.answers()[0].ttl(), 300);
    }

    #[tokio::test]
    async fn exchange_times_out() {
        // Bound but never answers.
        let (_server, addr) = udp_server().await;
        let upstream = UdpUpstream::new(addr, Duration::from_millis(100));
        let query = build_query(1, "example.com", RecordType::A).unwrap();

        let err = upstream.exchange(&query).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Timeout { timeout, .. } if timeout == upstream.timeout()));
    }

    #[tokio::test]
    async fn truncated_answer_retries_over_tcp() {
        let (udp, addr) = udp_server().await;
        let tcp = TcpListener::bind(addr).await.unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = udp.recv_from(&mut buf).await.unwrap();
            let query = Message::from_vec(&buf[..len]).unwrap();
            let mut truncated = answer_with_ttls(&query, &[]);
            truncated.set_truncated(true);
            udp.send_to(&truncated.to_vec().unwrap(), src).await.unwrap();
        });
        tokio::spawn(async move {
            let (mut stream, _) = tcp.accept().await.unwrap();
            let query = read_dns_message(&mut stream).await.unwrap();
            let query = Message::from_vec(&query).unwrap();

            let answer = answer_with_ttls(&query, &[60, 60, 60]).to_vec().unwrap();
            write_dns_message(&mut stream, &answer).await.unwrap();
        });

        let upstream = UdpUpstream::new(addr, Duration::from_secs(2));
        let query = build_query(9, "example.com", RecordType::A).unwrap();

        let answer = upstream.exchange(&query).await.unwrap();

        assert!(!answer.truncated());
        assert_eq!(answer.answers().len(), 3);
    }
}
