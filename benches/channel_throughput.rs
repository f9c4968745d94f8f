use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use netchan::channel::{Channel, Role};
use netchan::config::ChannelConfig;
use netchan::io::{InMemoryFileIo, LoopbackSocket};
use quanta::Instant;
use std::net::SocketAddr;

fn client_addr() -> SocketAddr {
    "203.0.113.10:27015".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "203.0.113.20:27005".parse().unwrap()
}

fn new_pair(now: Instant) -> (Channel<SocketAddr>, Channel<SocketAddr>) {
    let client = Channel::setup(
        Role::Client,
        server_addr(),
        ChannelConfig {
            qport: 4242,
            ..ChannelConfig::default()
        },
        now,
    );
    let server = Channel::setup(Role::Server, client_addr(), ChannelConfig::default(), now);
    (client, server)
}

/// Benchmark the transmit hot path: latch a small reliable message and build
/// the packet for it.
fn bench_transmit_small_reliable(c: &mut Criterion) {
    let now = Instant::now();
    let fileio = InMemoryFileIo::new();

    let mut group = c.benchmark_group("transmit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("small_reliable_message", |b| {
        let (mut client, _server) = new_pair(now);
        let mut socket = LoopbackSocket::<SocketAddr>::new();
        b.iter(|| {
            client.message_mut().write_string("hello");
            client
                .transmit(&mut socket, &fileio, black_box(now), &[])
                .unwrap();
            socket.take_sent(&server_addr());
        });
    });

    group.bench_function("unreliable_payload_only", |b| {
        let (mut client, _server) = new_pair(now);
        let mut socket = LoopbackSocket::<SocketAddr>::new();
        let payload = vec![0xABu8; 512];
        b.iter(|| {
            client
                .transmit(&mut socket, &fileio, black_box(now), black_box(&payload))
                .unwrap();
            socket.take_sent(&server_addr());
        });
    });

    group.finish();
}

/// Benchmark the receive hot path: process() on a pre-built packet stream.
fn bench_process_stream(c: &mut Criterion) {
    let now = Instant::now();
    let fileio = InMemoryFileIo::new();

    let (mut client, _server) = new_pair(now);
    let mut client_socket = LoopbackSocket::<SocketAddr>::new();
    let mut packets = Vec::new();
    for i in 0..200 {
        client
            .transmit(&mut client_socket, &fileio, now, &[(i % 256) as u8])
            .unwrap();
    }
    for pkt in client_socket.take_sent(&server_addr()) {
        packets.push(pkt);
    }

    let mut group = c.benchmark_group("process");
    group.throughput(Throughput::Elements(1));

    group.bench_function("process_single_packet", |b| {
        let mut idx = 0;
        let (_client, mut server) = new_pair(now);
        b.iter(|| {
            let pkt = &packets[idx % packets.len()];
            black_box(server.process(&client_addr(), black_box(pkt), now));
            idx += 1;
        });
    });

    group.finish();
}

/// Benchmark a full transmit -> process round trip (in-process, no network).
fn bench_transmit_process_roundtrip(c: &mut Criterion) {
    let now = Instant::now();
    let fileio = InMemoryFileIo::new();

    let mut group = c.benchmark_group("roundtrip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("transmit_then_process", |b| {
        let (mut client, mut server) = new_pair(now);
        let mut socket = LoopbackSocket::<SocketAddr>::new();
        let payload = vec![0x42u8; 64];
        b.iter(|| {
            client
                .transmit(&mut socket, &fileio, now, black_box(&payload))
                .unwrap();
            for pkt in socket.take_sent(&server_addr()) {
                black_box(server.process(&client_addr(), &pkt, now));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_transmit_small_reliable,
    bench_process_stream,
    bench_transmit_process_roundtrip
);
criterion_main!(benches);
