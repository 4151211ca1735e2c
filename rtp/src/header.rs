#[cfg(test)]
mod header_test;

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};

pub const FIXED_HEADER_LEN: usize = 12;
pub const RTP_VERSION: u8 = 2;

const VERSION_SHIFT: u8 = 6;
const VERSION_MASK: u8 = 0x3;

const PADDING_SHIFT: u8 = 5;
const PADDING_MASK: u8 = 0x1;

const EXTENSION_SHIFT: u8 = 4;
const EXTENSION_MASK: u8 = 0x1;

const CC_MASK: u8 = 0xF;

const MARKER_SHIFT: u8 = 7;
const MARKER_MASK: u8 = 0x1;

const PT_MASK: u8 = 0x7F;

const CSRC_LENGTH: usize = 4;

/// Header represents the fixed RTP packet header plus the optional CSRC
/// list and extension block (RFC 3550 section 5.1).
///
/// The extension payload is kept opaque. The monitor never interprets
/// negotiated extension elements, it only needs to step over them to
/// reach the media payload.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extension_payload: Bytes,
}

impl Header {
    /// Parses the fixed header, CSRC list and extension block from the
    /// front of `raw_packet`, leaving the cursor at the payload.
    pub fn unmarshal<B: Buf>(raw_packet: &mut B) -> Result<Self> {
        if raw_packet.remaining() < FIXED_HEADER_LEN {
            return Err(Error::ErrHeaderSizeInsufficient);
        }

        /*
         *  0                   1                   2                   3
         *  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |V=2|P|X|  CC   |M|     PT      |       sequence number         |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                           timestamp                           |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |           synchronization source (SSRC) identifier            |
         * +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
         * |            contributing source (CSRC) identifiers             |
         * |                             ....                              |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         */
        let b0 = raw_packet.get_u8();
        let version = b0 >> VERSION_SHIFT & VERSION_MASK;
        if version != RTP_VERSION {
            return Err(Error::ErrBadVersion(version));
        }
        let padding = (b0 >> PADDING_SHIFT & PADDING_MASK) > 0;
        let extension = (b0 >> EXTENSION_SHIFT & EXTENSION_MASK) > 0;
        let cc = (b0 & CC_MASK) as usize;

        let b1 = raw_packet.get_u8();
        let marker = (b1 >> MARKER_SHIFT & MARKER_MASK) > 0;
        let payload_type = b1 & PT_MASK;

        let sequence_number = raw_packet.get_u16();
        let timestamp = raw_packet.get_u32();
        let ssrc = raw_packet.get_u32();

        if raw_packet.remaining() < cc * CSRC_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(raw_packet.get_u32());
        }

        let (extension_profile, extension_payload) = if extension {
            if raw_packet.remaining() < 4 {
                return Err(Error::ErrHeaderSizeInsufficientForExtension);
            }
            let profile = raw_packet.get_u16();
            let length = raw_packet.get_u16() as usize * 4;
            if raw_packet.remaining() < length {
                return Err(Error::ErrHeaderSizeInsufficientForExtension);
            }
            (profile, raw_packet.copy_to_bytes(length))
        } else {
            (0, Bytes::new())
        };

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extension_payload,
        })
    }

    /// MarshalSize returns the size of the header once marshaled.
    pub fn marshal_size(&self) -> usize {
        let mut size = FIXED_HEADER_LEN + self.csrc.len() * CSRC_LENGTH;
        if self.extension {
            size += 4 + self.extension_payload.len();
        }
        size
    }

    /// Serializes the header into `buf`. The extension payload must
    /// already be padded to a 32-bit boundary.
    pub fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let size = self.marshal_size();
        if buf.remaining_mut() < size {
            return Err(Error::ErrBufferTooSmall);
        }
        if self.extension && self.extension_payload.len() % 4 != 0 {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut b0 = RTP_VERSION << VERSION_SHIFT;
        if self.padding {
            b0 |= 1 << PADDING_SHIFT;
        }
        if self.extension {
            b0 |= 1 << EXTENSION_SHIFT;
        }
        b0 |= self.csrc.len() as u8 & CC_MASK;
        buf.put_u8(b0);

        let mut b1 = self.payload_type & PT_MASK;
        if self.marker {
            b1 |= 1 << MARKER_SHIFT;
        }
        buf.put_u8(b1);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            buf.put_u16(self.extension_profile);
            buf.put_u16((self.extension_payload.len() / 4) as u16);
            buf.put_slice(&self.extension_payload);
        }

        Ok(size)
    }
}
