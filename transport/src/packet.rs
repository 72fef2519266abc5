use crate::config::RudpConfig;
use anyhow::bail;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// The packet kinds, serialized on the wire as their upper-case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "CONNECT_ACK")]
    ConnectAck,
    #[serde(rename = "DATA")]
    Data,
    #[serde(rename = "LAST")]
    Last,
    #[serde(rename = "ACK")]
    Ack,
}

impl PacketType {
    /// Only data-carrying packets have their checksum verified; control packets are exempt.
    pub fn is_checksummed(&self) -> bool {
        matches!(self, PacketType::Data | PacketType::Last)
    }
}

/// The wire representation of the header record. Field order is part of the wire format.
#[derive(Serialize, Deserialize)]
struct WireHeader {
    seq: u64,
    checksum: String,
    #[serde(rename = "type")]
    packet_type: PacketType,
    length: usize,
    #[serde(default)]
    session: String,
}

/// One decoded wire unit. `encode` / `decode` translate to and from the fixed-layout
///  datagram described in the crate docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u64,
    pub packet_type: PacketType,
    pub session_id: String,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(seq: u64, session_id: &str, chunk: &[u8], last: bool) -> Packet {
        Packet {
            seq,
            packet_type: if last { PacketType::Last } else { PacketType::Data },
            session_id: session_id.to_owned(),
            payload: chunk.to_vec(),
        }
    }

    pub fn ack(seq: u64, session_id: &str) -> Packet {
        Packet {
            seq,
            packet_type: PacketType::Ack,
            session_id: session_id.to_owned(),
            payload: b"ACK".to_vec(),
        }
    }

    /// Session setup request. The session id is empty on first contact and echoes the known
    ///  id on a retry.
    pub fn connect(session_id: &str) -> Packet {
        Packet {
            seq: 0,
            packet_type: PacketType::Connect,
            session_id: session_id.to_owned(),
            payload: b"CONNECT".to_vec(),
        }
    }

    pub fn connect_ack(session_id: &str) -> Packet {
        Packet {
            seq: 0,
            packet_type: PacketType::ConnectAck,
            session_id: session_id.to_owned(),
            payload: session_id.as_bytes().to_vec(),
        }
    }

    /// Serialize into a datagram: the JSON header padded with spaces to the fixed header
    ///  region, followed by the raw payload. Fails if the payload exceeds the per-packet
    ///  maximum or the header record does not fit its region (overlong session id).
    pub fn encode(&self, config: &RudpConfig) -> anyhow::Result<BytesMut> {
        if self.payload.len() > config.max_payload_size() {
            bail!("payload of {} bytes exceeds the per-packet maximum of {}", self.payload.len(), config.max_payload_size());
        }

        let header = serde_json::to_vec(&WireHeader {
            seq: self.seq,
            checksum: payload_checksum(&self.payload),
            packet_type: self.packet_type,
            length: self.payload.len(),
            session: self.session_id.clone(),
        })?;
        if header.len() > config.header_size {
            bail!("encoded header of {} bytes exceeds the fixed header region of {}", header.len(), config.header_size);
        }

        let mut buf = BytesMut::with_capacity(config.header_size + self.payload.len());
        buf.put_slice(&header);
        buf.put_bytes(b' ', config.header_size - header.len());
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a received datagram. Any malformation - truncation, unparseable header, declared
    ///  length beyond the datagram, checksum mismatch on a data packet - is an error; callers
    ///  log and drop, they never reply.
    pub fn decode(datagram: &[u8], config: &RudpConfig) -> anyhow::Result<Packet> {
        if datagram.len() < config.header_size {
            bail!("truncated packet of {} bytes", datagram.len());
        }
        let (header_region, data_region) = datagram.split_at(config.header_size);
        let header: WireHeader = serde_json::from_slice(header_region.trim_ascii())?;

        if header.length > data_region.len() {
            bail!("declared payload length {} exceeds the {} received payload bytes", header.length, data_region.len());
        }
        let payload = data_region[..header.length].to_vec();

        if header.packet_type.is_checksummed() && payload_checksum(&payload) != header.checksum {
            bail!("checksum mismatch for packet {}", header.seq);
        }

        Ok(Packet {
            seq: header.seq,
            packet_type: header.packet_type,
            session_id: header.session,
            payload,
        })
    }
}

/// Lowercase hex MD5 digest of the payload. Detects accidental corruption only.
pub fn payload_checksum(payload: &[u8]) -> String {
    format!("{:x}", md5::compute(payload))
}
