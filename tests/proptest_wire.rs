//! # Property tests: the bit-level codec
//!
//! Replaces the teacher's `tests/proptest_wire.rs`/`proptest_fec.rs`/
//! `proptest_rlnc.rs` with properties scoped to this crate's wire format:
//! header/descriptor round-trips under arbitrary values, and `excise_bits`
//! as the inverse of inserting the same bits back in, which is the one
//! primitive the receive-path fragment reassembly leans on hardest.

use netchan::bitbuf::BitBuffer;
use netchan::wire::{FragmentDescriptor, PacketHeader, read_stream_slot, write_stream_slot};
use proptest::prelude::*;

proptest! {
    #[test]
    fn header_survives_arbitrary_round_trip(
        sequence in 0u32..=0x3FFF_FFFF,
        reliable in any::<bool>(),
        fragmented in any::<bool>(),
        acknowledged in 0u32..=0x7FFF_FFFF,
        reliable_ack in any::<bool>(),
    ) {
        let header = PacketHeader { sequence, reliable, fragmented, acknowledged, reliable_ack };
        let mut buf = BitBuffer::init("hdr", 16);
        header.encode(&mut buf);
        prop_assert_eq!(buf.num_bytes_written(), PacketHeader::ENCODED_LEN);
        let decoded = PacketHeader::decode(&mut buf);
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn fragment_descriptor_survives_arbitrary_round_trip(
        bufferid in any::<u32>(),
        frag_offset in any::<u32>(),
        frag_length in any::<u32>(),
    ) {
        let desc = FragmentDescriptor { bufferid, frag_offset, frag_length };
        let mut buf = BitBuffer::init("frag", 16);
        desc.encode(&mut buf);
        prop_assert_eq!(buf.num_bytes_written(), FragmentDescriptor::ENCODED_LEN);
        let decoded = FragmentDescriptor::decode(&mut buf);
        prop_assert_eq!(decoded, desc);
    }

    #[test]
    fn stream_slot_roundtrips_either_shape(
        present in any::<bool>(),
        bufferid in any::<u32>(),
        frag_offset in any::<u32>(),
        frag_length in any::<u32>(),
    ) {
        let desc = FragmentDescriptor { bufferid, frag_offset, frag_length };
        let mut buf = BitBuffer::init("slot", 32);
        write_stream_slot(&mut buf, if present { Some(&desc) } else { None });
        let decoded = read_stream_slot(&mut buf);
        if present {
            prop_assert_eq!(decoded, Some(desc));
        } else {
            prop_assert_eq!(decoded, None);
        }
    }

    /// `excise_bits(pos, n)` undoes inserting `n` arbitrary bits at `pos`:
    /// build a buffer, splice `n` junk bits in at an interior offset, then
    /// excise that same range back out and recover the original bytes
    /// exactly. This is the operation `Channel::process` relies on to strip
    /// a consumed fragment descriptor's worth of bits out of the payload
    /// region without re-serializing the rest of the packet.
    #[test]
    fn excise_bits_undoes_an_interior_insert(
        payload in prop::collection::vec(any::<u8>(), 1..32),
        junk in any::<u32>(),
        junk_bits in 1usize..=32,
        split in 0usize..=100,
    ) {
        let total_bits = payload.len() * 8;
        let split_bit = (split * total_bits) / 100;

        let mut spliced = BitBuffer::init("spliced", payload.len() + 8);
        spliced.write_bits_from(&payload, 0, split_bit);
        spliced.write_bits(junk, junk_bits);
        spliced.write_bits_from(&payload, split_bit, total_bits - split_bit);

        prop_assert_eq!(spliced.num_bits_written(), total_bits + junk_bits);
        spliced.excise_bits(split_bit, junk_bits);
        prop_assert_eq!(spliced.num_bits_written(), total_bits);
        prop_assert_eq!(spliced.data(), payload.as_slice());
    }

    /// Writing `n` bytes and then reading all of them back via
    /// `read_remaining_bytes` after consuming some prefix returns exactly the
    /// unread suffix, left-aligned — this is what hands the caller their
    /// payload once the header, `qport`, and fragment descriptors have all
    /// been read off the front of a received packet.
    #[test]
    fn read_remaining_bytes_returns_the_unread_suffix(
        bytes in prop::collection::vec(any::<u8>(), 0..64),
        read_prefix in 0usize..64,
    ) {
        let mut buf = BitBuffer::init("buf", bytes.len().max(1));
        for &b in &bytes {
            buf.write_byte(b);
        }
        let to_read = read_prefix.min(bytes.len());
        for i in 0..to_read {
            prop_assert_eq!(buf.read_byte(), bytes[i]);
        }
        let remaining = buf.read_remaining_bytes();
        prop_assert_eq!(remaining, bytes[to_read..].to_vec());
    }
}
