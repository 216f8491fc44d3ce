//! DNS message helpers on top of `hickory-proto`.
//!
//! Normalization, cache fingerprints and synthesized replies. Decoding and
//! encoding themselves are left to `hickory_proto::op::Message`.

use std::fmt;
use std::str::FromStr;

use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};

/// Payload limit for UDP replies when the client does not advertise EDNS.
pub const MIN_UDP_PAYLOAD: usize = 512;

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Lowercase a domain name and strip one trailing dot.
pub fn normalize_name(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Cache identity of a question: normalized name plus record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    name: String,
    record_type: RecordType,
}

impl Fingerprint {
    pub fn new(name: &str, record_type: RecordType) -> Self {
        Self {
            name: normalize_name(name),
            record_type,
        }
    }

    pub fn of_query(query: &Query) -> Self {
        Self::new(&query.name().to_ascii(), query.query_type())
    }

    /// Fingerprint of the first question, `None` if there is no question.
    pub fn of_message(message: &Message) -> Option<Self> {
        message.queries().first().map(Self::of_query)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.record_type)
    }
}

/// Build a recursive query for `name`.
pub fn build_query(id: u16, name: &str, record_type: RecordType) -> Result<Message, ProtoError> {
    let name = Name::from_str(name)?;

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, record_type));

    Ok(message)
}

/// Build a reply that mirrors `query` (id, op code, question, RD flag) with
/// the given result code and no records.
pub fn reply_with_code(query: &Message, code: ResponseCode) -> Message {
    let mut reply = Message::error_msg(query.id(), query.op_code(), code);
    reply
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .add_queries(query.queries().iter().cloned());
    reply
}

/// Header-and-question copy of `answer` with the TC bit set, telling the
/// client to retry over TCP.
pub fn truncated_reply(answer: &Message) -> Message {
    let mut reply = reply_with_code(answer, answer.response_code());
    reply.set_truncated(true);
    reply
}

/// Minimum TTL across the answer section, `None` if it is empty.
pub fn min_answer_ttl(message: &Message) -> Option<u32> {
    message.answers().iter().map(|record| record.ttl()).min()
}

/// Largest UDP reply the client accepts.
pub fn udp_payload_limit(query: &Message) -> usize {
    query
        .extensions()
        .as_ref()
        .map(|edns| usize::from(edns.max_payload()).max(MIN_UDP_PAYLOAD))
        .unwrap_or(MIN_UDP_PAYLOAD)
}

/// Read the transaction id straight from a raw header.
pub fn packet_id(packet: &[u8]) -> Option<u16> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([packet[0], packet[1]]))
}

#[cfg(test)]
pub(crate) fn answer_with_ttls(query: &Message, ttls: &[u32]) -> Message {
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{RData, Record};

    let mut answer = reply_with_code(query, ResponseCode::NoError);
    let name = query.queries()[0].name().clone();
    for (i, ttl) in ttls.iter().enumerate() {
        let rdata = RData::A(A::new(192, 0, 2, i as u8 + 1));
        answer.add_answer(Record::from_rdata(name.clone(), *ttl, rdata));
    }
    answer
}
