//! Transport layer implementations for the forwarder.
//!
//! Provides UDP and TCP listeners that decode client queries, hand them to
//! the [`Resolver`] and write exactly one reply per decodable query.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::time::Instant;

use hickory_proto::op::{Message, OpCode, ResponseCode};
use tracing::{debug, warn};

use crate::dns::{packet_id, reply_with_code, truncated_reply, udp_payload_limit};
use crate::error::ResolveError;
use crate::resolver::Resolver;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// Turn one raw query into one raw reply.
///
/// Undecodable packets get a FORMERR carrying the header id; packets too
/// short to carry a header get nothing. Resolution failures become FORMERR
/// (no question) or SERVFAIL (upstream failure). UDP replies larger than
/// the client accepts are replaced by a truncated reply.
pub async fn handle_packet(resolver: &Resolver, packet: &[u8], protocol: Protocol) -> Option<Vec<u8>> {
    let start = Instant::now();

    let query = match Message::from_vec(packet) {
        Ok(query) => query,
        Err(e) => {
            let id = packet_id(packet)?;
            debug!(protocol = protocol.as_str(), id, error = %e, "undecodable query");
            return encode(&Message::error_msg(id, OpCode::Query, ResponseCode::FormErr));
        }
    };

    let reply = match resolver.resolve(&query).await {
        Ok(answer) => {
            debug!(
                protocol = protocol.as_str(),
                id = query.id(),
                outcome = answer.kind(),
                total_ms = start.elapsed().as_secs_f64() * 1000.0,
                "answered"
            );
            answer.into_message()
        }
        Err(ResolveError::MalformedQuery) => reply_with_code(&query, ResponseCode::FormErr),
        Err(ResolveError::UpstreamFailure(_)) => reply_with_code(&query, ResponseCode::ServFail),
    };

    let bytes = match encode(&reply) {
        Some(bytes) => bytes,
        None => return encode(&reply_with_code(&query, ResponseCode::ServFail)),
    };

    if protocol == Protocol::Udp && bytes.len() > udp_payload_limit(&query) {
        return encode(&truncated_reply(&reply));
    }
    Some(bytes)
}

fn encode(message: &Message) -> Option<Vec<u8>> {
    match message.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(id = message.id(), error = %e, "failed to encode reply");
            None
        }
    }
}
