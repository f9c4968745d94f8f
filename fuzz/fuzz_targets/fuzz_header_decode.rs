#![no_main]

use libfuzzer_sys::fuzz_target;
use netchan::bitbuf::BitBuffer;
use netchan::wire::{read_stream_slot, FragmentDescriptor, PacketHeader};

/// Fuzz the bit-level header and fragment-descriptor decoders with arbitrary
/// bytes.
///
/// This target exercises:
/// - `PacketHeader::decode` on a short or garbage buffer
/// - `FragmentDescriptor::decode` on whatever bits remain afterward
/// - `read_stream_slot` dispatch on the presence byte
///
/// None of these should panic on any input; decoding past the end of the
/// buffer yields zero bits rather than an error.
fuzz_target!(|data: &[u8]| {
    let mut buf = BitBuffer::start_reading(data.to_vec(), data.len() * 8);
    let _header = PacketHeader::decode(&mut buf);
    let _slot_a = read_stream_slot(&mut buf);
    let _slot_b = read_stream_slot(&mut buf);

    let mut buf2 = BitBuffer::start_reading(data.to_vec(), data.len() * 8);
    let _desc = FragmentDescriptor::decode(&mut buf2);
});
