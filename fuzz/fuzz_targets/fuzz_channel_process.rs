#![no_main]

use libfuzzer_sys::fuzz_target;
use netchan::channel::{Channel, Role};
use netchan::config::ChannelConfig;
use quanta::Instant;
use std::net::SocketAddr;

/// Fuzz `Channel::process` directly with arbitrary packet bytes.
///
/// This exercises header decode, `qport` consumption, fragment-descriptor
/// validation, sequence/ack bookkeeping, and the reassembly loop (including
/// `excise_bits` on attacker-controlled offsets) all in one pass. A
/// malformed fragment descriptor must be rejected by `validate` rather than
/// driving an out-of-bounds `excise_bits` call or a panic.
fuzz_target!(|data: &[u8]| {
    let now = Instant::now();
    let peer: SocketAddr = "203.0.113.10:27015".parse().unwrap();
    let mut server = Channel::setup(Role::Server, peer, ChannelConfig::default(), now);
    let _ = server.process(&peer, data, now);

    // Feed the same bytes again to exercise the stale/duplicate-sequence
    // path once `incoming_sequence` has advanced.
    let _ = server.process(&peer, data, now);
});
