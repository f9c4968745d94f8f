#![no_main]

use libfuzzer_sys::fuzz_target;
use netchan::bitbuf::BitBuffer;

/// Fuzz `BitBuffer`'s read/write/excise primitives with arbitrary bytes,
/// treating the first few bytes as parameters for where to splice and excise.
///
/// `excise_bits` is the one primitive the fragment reassembly path leans on
/// to strip a consumed descriptor out of a received packet's middle; it must
/// never panic regardless of how the offsets line up with the buffer's
/// actual length.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let (header, rest) = data.split_at(4);
    let split_pct = header[0] as usize;
    let excise_len_byte = header[1] as usize;

    let mut buf = BitBuffer::start_reading(rest.to_vec(), rest.len() * 8);
    let _ = buf.read_remaining_bytes();

    let mut spliced = BitBuffer::init("fuzz", rest.len() + 8);
    let total_bits = rest.len() * 8;
    if total_bits == 0 {
        return;
    }
    let split_bit = (split_pct % 101) * total_bits / 100;
    spliced.write_bits_from(rest, 0, split_bit);
    spliced.write_bits(0xDEAD_BEEF, (excise_len_byte % 32).max(1));
    spliced.write_bits_from(rest, split_bit, total_bits - split_bit);

    let junk_bits = (excise_len_byte % 32).max(1);
    if split_bit + junk_bits <= spliced.num_bits_written() {
        spliced.excise_bits(split_bit, junk_bits);
    }
});
