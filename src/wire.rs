//! # Packet Header Codec
//!
//! Encodes and decodes the two-word (`w1`/`w2`) sequence header every
//! datagram carries, plus the per-stream fragment descriptors that precede a
//! fragmented payload. Everything here is bit-level framing only — no
//! retransmission or reassembly logic lives in this module (see
//! [`crate::pool`] and [`crate::channel`]).
//!
//! ## Header layout
//!
//! ```text
//! w1: [ reliable:1 | fragmented:1 | outgoing_sequence:30 ]
//! w2: [ reliable_ack:1 |        incoming_acknowledged:31 ]
//! ```
//!
//! `w1`'s low 30 bits are this packet's outgoing sequence number; bit 30
//! flags that one or more fragment descriptors follow the header; bit 31 is
//! the single-bit parity of the reliable payload riding along, if any.
//! `w2`'s low 31 bits echo back the highest sequence this channel has seen
//! from the peer; bit 31 is the parity bit being acknowledged.
//!
//! A client-origin packet additionally carries a 16-bit `qport` right after
//! the header, used to disambiguate multiple clients behind the same
//! NAT-translated address (§4.1, §6).
//!
//! Following the header (and `qport`, if present) come [`MAX_STREAMS`]
//! per-stream fragment slots, present only when `w1`'s fragmented bit is
//! set: a presence byte, and — only when that byte is nonzero — a
//! [`FragmentDescriptor`] naming which piece of which group follows and
//! where its bits start and end within the payload region.

use crate::bitbuf::BitBuffer;

/// Matches the original engine's protocol revision; bumped whenever the
/// wire layout changes in a way that breaks compatibility.
pub const PROTOCOL_VERSION: u32 = 49;

/// Largest payload a single fragment may carry off-loopback.
pub const FRAGMENT_MAX_SIZE: usize = 1400;

/// Upper bound on a packet sent over loopback (no fragment chunking needed).
pub const NET_MAX_PAYLOAD: usize = 65536;

/// Default fragmentation threshold for the pending reliable `message`.
pub const MAX_MSGLEN: usize = 1400;

/// Largest reliable message body (regular + spliced fragment) that can ride
/// in one packet.
pub const MAX_RELIABLE_PAYLOAD: usize = 1200;

/// Used only for bandwidth accounting (`cleartime` math includes this).
pub const UDP_HEADER_SIZE: usize = 28;

/// A no-op service byte written when a packet would otherwise fall under the
/// 16-byte minimum, so the receiver always has enough bytes to parse.
pub const SVC_NOP: u8 = 0;

/// Default outbound rate in bytes/sec, used when a channel isn't configured
/// with an explicit `rate` (§6 cvars).
pub const DEFAULT_RATE: u32 = 20_000;

/// The two fragmentation streams, in wire order (§6).
pub const MAX_STREAMS: usize = 2;

const SEQUENCE_MASK: u32 = 0x3FFF_FFFF;
const FRAGMENT_FLAG: u32 = 1 << 30;
const RELIABLE_FLAG: u32 = 1 << 31;
const ACK_MASK: u32 = 0x7FFF_FFFF;
const RELIABLE_ACK_FLAG: u32 = 1 << 31;

/// Decoded form of the two sequence header words (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub reliable: bool,
    pub fragmented: bool,
    pub acknowledged: u32,
    pub reliable_ack: bool,
}

impl PacketHeader {
    pub fn encode(&self, buf: &mut BitBuffer) {
        let mut w1 = self.sequence & SEQUENCE_MASK;
        if self.fragmented {
            w1 |= FRAGMENT_FLAG;
        }
        if self.reliable {
            w1 |= RELIABLE_FLAG;
        }
        let mut w2 = self.acknowledged & ACK_MASK;
        if self.reliable_ack {
            w2 |= RELIABLE_ACK_FLAG;
        }
        buf.write_long(w1);
        buf.write_long(w2);
    }

    pub fn decode(buf: &mut BitBuffer) -> Self {
        let w1 = buf.read_long();
        let w2 = buf.read_long();
        PacketHeader {
            sequence: w1 & SEQUENCE_MASK,
            fragmented: w1 & FRAGMENT_FLAG != 0,
            reliable: w1 & RELIABLE_FLAG != 0,
            acknowledged: w2 & ACK_MASK,
            reliable_ack: w2 & RELIABLE_ACK_FLAG != 0,
        }
    }

    /// Size of the encoded header in bytes; fixed, no variable-length
    /// fields.
    pub const ENCODED_LEN: usize = 8;
}

/// One fragment's on-wire descriptor (§4.5, §6 wire layout): which piece of
/// which group (`bufferid`, packed via [`crate::pool::make_bufferid`]), and
/// where its bits live within this packet's payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentDescriptor {
    pub bufferid: u32,
    /// Bit offset from the start of the payload region.
    pub frag_offset: u32,
    /// Length in bits.
    pub frag_length: u32,
}

impl FragmentDescriptor {
    /// Three `u32`s, not counting the presence byte written alongside it.
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self, buf: &mut BitBuffer) {
        buf.write_long(self.bufferid);
        buf.write_long(self.frag_offset);
        buf.write_long(self.frag_length);
    }

    pub fn decode(buf: &mut BitBuffer) -> Self {
        FragmentDescriptor {
            bufferid: buf.read_long(),
            frag_offset: buf.read_long(),
            frag_length: buf.read_long(),
        }
    }
}

/// Write one stream's `{present, descriptor?}` slot (§6 wire layout).
pub fn write_stream_slot(buf: &mut BitBuffer, desc: Option<&FragmentDescriptor>) {
    match desc {
        Some(d) => {
            buf.write_byte(1);
            d.encode(buf);
        }
        None => buf.write_byte(0),
    }
}

/// Read one stream's `{present, descriptor?}` slot (§6 wire layout).
pub fn read_stream_slot(buf: &mut BitBuffer) -> Option<FragmentDescriptor> {
    if buf.read_byte() != 0 {
        Some(FragmentDescriptor::decode(buf))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_roundtrip_basic() {
        let header = PacketHeader {
            sequence: 42,
            reliable: true,
            fragmented: false,
            acknowledged: 41,
            reliable_ack: false,
        };
        let mut buf = BitBuffer::init("hdr", 16);
        header.encode(&mut buf);
        let decoded = PacketHeader::decode(&mut buf);
        assert_eq!(decoded, header);
    }

    #[test]
    fn fragment_descriptor_roundtrip() {
        let desc = FragmentDescriptor {
            bufferid: (3 << 16) | 9,
            frag_offset: 128,
            frag_length: 1024,
        };
        let mut buf = BitBuffer::init("frag", 16);
        desc.encode(&mut buf);
        let decoded = FragmentDescriptor::decode(&mut buf);
        assert_eq!(decoded, desc);
    }

    #[test]
    fn stream_slot_roundtrips_absent_and_present() {
        let mut buf = BitBuffer::init("slots", 64);
        write_stream_slot(&mut buf, None);
        let desc = FragmentDescriptor {
            bufferid: 1 << 16 | 4,
            frag_offset: 0,
            frag_length: 256,
        };
        write_stream_slot(&mut buf, Some(&desc));

        assert_eq!(read_stream_slot(&mut buf), None);
        assert_eq!(read_stream_slot(&mut buf), Some(desc));
    }

    proptest! {
        #[test]
        fn header_roundtrip_arbitrary(
            sequence in 0u32..=SEQUENCE_MASK,
            reliable in any::<bool>(),
            fragmented in any::<bool>(),
            acknowledged in 0u32..=ACK_MASK,
            reliable_ack in any::<bool>(),
        ) {
            let header = PacketHeader { sequence, reliable, fragmented, acknowledged, reliable_ack };
            let mut buf = BitBuffer::init("hdr", 16);
            header.encode(&mut buf);
            let decoded = PacketHeader::decode(&mut buf);
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn fragment_descriptor_roundtrip_arbitrary(
            bufferid in any::<u32>(),
            frag_offset in any::<u32>(),
            frag_length in any::<u32>(),
        ) {
            let desc = FragmentDescriptor { bufferid, frag_offset, frag_length };
            let mut buf = BitBuffer::init("frag", 16);
            desc.encode(&mut buf);
            let decoded = FragmentDescriptor::decode(&mut buf);
            prop_assert_eq!(decoded, desc);
        }
    }
}
