
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::Header;

/// Packet represents a parsed RTP packet: header plus de-padded payload.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "RTP PACKET:\n".to_string();

        out += format!("\tVersion: {}\n", self.header.version).as_str();
        out += format!("\tMarker: {}\n", self.header.marker).as_str();
        out += format!("\tPayload Type: {}\n", self.header.payload_type).as_str();
        out += format!("\tSequence Number: {}\n", self.header.sequence_number).as_str();
        out += format!("\tTimestamp: {}\n", self.header.timestamp).as_str();
        out += format!("\tSSRC: {} ({:x})\n", self.header.ssrc, self.header.ssrc).as_str();
        out += format!("\tPayload Length: {}\n", self.payload.len()).as_str();

        write!(f, "{out}")
    }
}

impl Packet {
    /// Parses one RTP packet out of `raw_packet`. When the padding bit is
    /// set, the final payload byte counts the padding octets (itself
    /// included) and the padding is stripped here.
    pub fn unmarshal<B: Buf>(raw_packet: &mut B) -> Result<Self> {
        let header = Header::unmarshal(raw_packet)?;
        let payload_len = raw_packet.remaining();
        let payload = raw_packet.copy_to_bytes(payload_len);
        if header.padding {
            if payload_len == 0 {
                return Err(Error::ErrShortPacket);
            }
            let padding_len = payload[payload_len - 1] as usize;
            if padding_len == 0 || padding_len > payload_len {
                return Err(Error::ErrShortPacket);
            }
            Ok(Packet {
                header,
                payload: payload.slice(..payload_len - padding_len),
            })
        } else {
            Ok(Packet { header, payload })
        }
    }

    /// MarshalSize returns the size of the packet once marshaled.
    pub fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }

    /// Serializes the packet. Padding is never emitted; the monitor only
    /// builds unpadded packets for loopback tests and capture replay.
    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let n = self.header.marshal_to(&mut buf)?;
        debug_assert_eq!(n, self.header.marshal_size());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}
