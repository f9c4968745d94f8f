//! # Channel State & Transmit/Receive Engine
//!
//! Ties the bit-level codec ([`crate::wire`]), the fragment store
//! ([`crate::pool`]), and the flow meter ([`crate::stats`]) together into the
//! single-outstanding-reliable-message channel described in §3/§4. A
//! [`Channel`] is pure logic: it never touches a socket or a filesystem
//! directly, only through the [`PacketSocket`]/[`FragmentFileIo`]
//! collaborators passed in per call — the same split the teacher crate draws
//! between its sender/receiver state machines and the transport underneath.

use std::time::Duration;

use quanta::Instant;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::bitbuf::BitBuffer;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, FileRejectReason};
use crate::io::{FragmentFileIo, PacketSocket};
use crate::pool::{
    bufferid_count, bufferid_index, make_bufferid, Fragment, FragmentGroup, FragmentStore, Stream,
};
use crate::stats::{FlowMeter, FlowStats};
use crate::wire::{
    read_stream_slot, write_stream_slot, FragmentDescriptor, PacketHeader, FRAGMENT_MAX_SIZE,
    MAX_MSGLEN, MAX_RELIABLE_PAYLOAD, MAX_STREAMS, NET_MAX_PAYLOAD, SVC_NOP, UDP_HEADER_SIZE,
};

/// Which end of the connection this channel represents. Only `Client`
/// packets carry `qport` (§4.1, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Outcome of a [`Channel::transmit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitOutcome {
    pub bytes_sent: usize,
    pub sent_reliable: bool,
    pub had_fragments: bool,
}

/// Outcome of a [`Channel::process`] call. `accepted = false` means the
/// packet was silently dropped (stale sequence, foreign address, failed
/// validation) — never a [`ChannelError`], since packet rejection is the
/// channel's ordinary common path (§7).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    pub accepted: bool,
    /// Number of sequence numbers skipped between the last accepted packet
    /// and this one (§4.8 `net_drop`).
    pub net_drop: u32,
    /// A stream reported as many fragments as its declared count, but they
    /// weren't contiguous from 0 — a genuine gap rather than "more to come"
    /// (§4.7).
    pub reassembly_gap: bool,
    /// Whatever bits remained in the packet once the header, `qport`, and
    /// any fragment descriptors/bodies were consumed (§4.5 step 10).
    pub payload: Option<Vec<u8>>,
}

/// Result of a successful or harmlessly-rejected [`Channel::copy_file_fragments`]
/// call (§4.7). Maps onto the original boolean API as `Written` and
/// `AlreadyExists` both being "true" (the queue was drained either way) while
/// [`FileRejectReason`] (returned as `Err`) is "false".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCopyOutcome {
    Written { filename: String, bytes: usize },
    AlreadyExists { filename: String },
}

/// A reliable-with-fragmentation datagram channel to a single peer (§3).
///
/// Generic only over the peer address type — sockets and file I/O are
/// injected per call rather than stored, so the state machine here stays
/// testable without any real I/O, matching the "pure logic, no I/O" split
/// the teacher draws between its sender/receiver and the transport beneath
/// them.
#[derive(Debug)]
pub struct Channel<A: PeerAddress> {
    role: Role,
    remote_address: A,
    qport: u16,
    rate: u32,
    choke_loopback: bool,
    show_drop: bool,
    net_speeds: bool,

    cleartime: Instant,
    last_received: Instant,
    connect_time: Instant,

    outgoing_sequence: u32,
    incoming_sequence: u32,
    incoming_acknowledged: u32,

    /// Parity bit of the reliable payload currently latched (flips each time
    /// a *new* one is queued, §4.5 step 3.f).
    reliable_sequence: bool,
    last_reliable_sequence: u32,
    incoming_reliable_sequence: bool,
    incoming_reliable_acknowledged: bool,

    /// Pending outbound reliable payload, written by the caller before the
    /// next [`Channel::transmit`].
    message: BitBuffer,
    /// The latched copy of the last reliable payload actually sent, resent
    /// verbatim until acknowledged.
    reliable_buf: Vec<u8>,
    reliable_bit_len: usize,
    /// Nonzero while a reliable payload is outstanding and unacknowledged.
    reliable_length: usize,

    fragments: FragmentStore,

    flow_incoming: FlowMeter,
    flow_outgoing: FlowMeter,
}

impl<A: PeerAddress> Channel<A> {
    /// Build a freshly initialized channel (§4.3 `Setup`). No intermediate
    /// uninitialized state exists; `clear` is only ever called to reset an
    /// already-valid channel for reuse.
    pub fn setup(role: Role, remote_address: A, config: ChannelConfig, now: Instant) -> Self {
        Channel {
            role,
            remote_address,
            qport: config.qport,
            rate: config.rate.max(1),
            choke_loopback: config.choke_loopback,
            show_drop: config.show_drop,
            net_speeds: config.net_speeds,

            cleartime: now,
            last_received: now,
            connect_time: now,

            outgoing_sequence: 1,
            incoming_sequence: 0,
            incoming_acknowledged: 0,

            reliable_sequence: false,
            last_reliable_sequence: 0,
            incoming_reliable_sequence: false,
            incoming_reliable_acknowledged: false,

            message: BitBuffer::init("netchan-message", MAX_MSGLEN * 4),
            reliable_buf: Vec::new(),
            reliable_bit_len: 0,
            reliable_length: 0,

            fragments: FragmentStore::new(),

            flow_incoming: FlowMeter::new(now),
            flow_outgoing: FlowMeter::new(now),
        }
    }

    /// Reset a channel for reuse against the same or a different peer,
    /// dropping any in-flight reliable payload and fragment state.
    pub fn clear(&mut self, now: Instant) {
        self.message.clear();
        self.reliable_buf.clear();
        self.reliable_bit_len = 0;
        self.reliable_length = 0;
        self.fragments.clear();
        self.flow_incoming = FlowMeter::new(now);
        self.flow_outgoing = FlowMeter::new(now);
        self.cleartime = now;
    }

    /// The pending outbound reliable message buffer. Write to this before
    /// calling [`Channel::transmit`] to queue a new reliable payload; it is
    /// only actually latched and sent once the current one (if any) has been
    /// acknowledged.
    pub fn message_mut(&mut self) -> &mut BitBuffer {
        &mut self.message
    }

    pub fn remote_address(&self) -> &A {
        &self.remote_address
    }

    pub fn is_local(&self) -> bool {
        self.remote_address.is_loopback()
    }

    pub fn can_packet(&self, now: Instant) -> bool {
        now >= self.cleartime
    }

    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    pub fn incoming_sequence(&self) -> u32 {
        self.incoming_sequence
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    pub fn connect_time(&self) -> Instant {
        self.connect_time
    }

    pub fn has_outstanding_reliable(&self) -> bool {
        self.reliable_length > 0
    }

    /// Whether a fully-assembled inbound group is waiting to be drained on
    /// either stream (§4.7).
    pub fn incoming_ready(&self) -> bool {
        Stream::ALL
            .iter()
            .any(|&s| self.fragments.stream(s).incomingready)
    }

    pub fn incoming_ready_stream(&self, s: Stream) -> bool {
        self.fragments.stream(s).incomingready
    }

    pub fn flow_stats(&self) -> (FlowStats, FlowStats) {
        (self.flow_incoming.stats(), self.flow_outgoing.stats())
    }

    /// Rough inbound/outbound transfer progress across both streams, as a
    /// percentage (§4.9). Publishes the maximum across whichever
    /// stream/direction is furthest along.
    pub fn download_progress(&self) -> u8 {
        let mut max_pct: u32 = 0;
        for s in Stream::ALL {
            let st = self.fragments.stream(s);
            if let Some(first) = st.incomingbufs.first() {
                let total = (first.fragment_count() as u32).max(1);
                let pct = 100 * st.incomingbufs.len() as u32 / total;
                max_pct = max_pct.max(pct);
            }
            if st.fragbufcount > 0 {
                if let Some(head) = st.fragbufs.front() {
                    let pct = 100 * head.index() as u32 / st.fragbufcount;
                    max_pct = max_pct.max(pct);
                }
            }
        }
        max_pct.min(100) as u8
    }

    /// Log cumulative inbound/outbound byte counts if `net_speeds` is
    /// enabled (§4.8). A no-op otherwise so callers can call this
    /// unconditionally once per frame.
    pub fn report_flow(&self) {
        if !self.net_speeds {
            return;
        }
        let (incoming, outgoing) = self.flow_stats();
        info!(
            incoming = %prettify_bytes(incoming.total_bytes),
            outgoing = %prettify_bytes(outgoing.total_bytes),
            incoming_bps = incoming.bytes_per_second,
            outgoing_bps = outgoing.bytes_per_second,
            "netchan flow"
        );
    }

    /// Split `msg`'s bits into a waitlisted group of normal-stream
    /// fragments (§4.4). `block_size`, when set, overrides the default
    /// per-fragment chunk size (mirrors the original engine's optional
    /// `pfnBlockSize` client hook).
    pub fn create_fragments(&mut self, msg: &BitBuffer, block_size: Option<usize>) {
        let total_bits = msg.num_bits_written();
        let chunk_bytes = self.chunk_size_bits(block_size);
        let data = msg.data().to_vec();
        let group = build_fragment_group(&data, total_bits, chunk_bytes * 8, chunk_bytes);
        self.fragments.stream_mut(Stream::Normal).enqueue_group(group);
    }

    fn chunk_size_bits(&self, block_size: Option<usize>) -> usize {
        if self.is_local() {
            NET_MAX_PAYLOAD
        } else {
            block_size.unwrap_or(FRAGMENT_MAX_SIZE / 2).min(FRAGMENT_MAX_SIZE)
        }
    }

    /// Fragment a disk-backed file for transfer, reading its size up front
    /// but deferring the actual bytes to transmit time (§4.4, §4.5 step
    /// 3.h). Returns the number of fragments queued.
    pub fn create_file_fragments<F: FragmentFileIo>(
        &mut self,
        fileio: &F,
        filename: &str,
    ) -> std::io::Result<usize> {
        let total_size = fileio.file_size(filename)? as usize;
        Ok(self.build_file_fragment_group(filename, total_size, None))
    }

    /// Fragment an in-memory buffer for transfer instead of a file on disk;
    /// every fragment carries its bytes immediately (§4.4 note on
    /// `isbuffer`). Returns the number of fragments queued.
    pub fn create_file_fragments_from_buffer(&mut self, filename: &str, data: &[u8]) -> usize {
        self.build_file_fragment_group(filename, data.len(), Some(data))
    }

    fn build_file_fragment_group(
        &mut self,
        filename: &str,
        total_size: usize,
        inline_bytes: Option<&[u8]>,
    ) -> usize {
        let chunk_bytes = if self.is_local() {
            NET_MAX_PAYLOAD
        } else {
            FRAGMENT_MAX_SIZE / 2
        };

        let mut name_buf = BitBuffer::init("fname", filename.len() + 2);
        name_buf.write_string(filename);
        let name_bytes = name_buf.num_bytes_written();
        let first_payload = chunk_bytes.saturating_sub(name_bytes).max(1);

        let mut spans = Vec::new();
        let mut pos = 0usize;
        let mut first = true;
        loop {
            let remaining = total_size - pos;
            let take = if first {
                first_payload.min(remaining)
            } else {
                chunk_bytes.min(remaining)
            };
            spans.push((pos, take, first));
            pos += take;
            first = false;
            if pos >= total_size {
                break;
            }
        }
        let count = spans.len() as u16;

        let mut group = FragmentGroup::default();
        for (i, (offset, size, is_first)) in spans.into_iter().enumerate() {
            let capacity = if is_first { chunk_bytes.max(name_bytes + 1) } else { chunk_bytes };
            let mut frag = Fragment::alloc_with_capacity(make_bufferid(i as u16, count), capacity);
            frag.isfile = true;
            frag.foffset = offset as u64;
            frag.size = size;
            frag.filename = Some(filename.to_string());
            if is_first {
                frag.payload.write_string(filename);
            }
            if let Some(bytes) = inline_bytes {
                frag.isbuffer = true;
                for &b in &bytes[offset..offset + size] {
                    frag.payload.write_byte(b);
                }
            }
            group.push(frag);
        }
        let n = group.fragbufcount as usize;
        self.fragments.stream_mut(Stream::File).enqueue_group(group);
        n
    }

    /// Drain a fully-assembled normal-stream inbound group into one
    /// contiguous buffer (§4.7). Returns `None` if nothing is ready.
    pub fn copy_normal_fragments(&mut self) -> Option<Vec<u8>> {
        let st = self.fragments.stream_mut(Stream::Normal);
        if !st.incomingready {
            return None;
        }
        if st.incomingbufs.is_empty() {
            warn!("normal fragment stream marked ready but empty");
            st.incomingready = false;
            return None;
        }
        let total_bytes: usize = st
            .incomingbufs
            .iter()
            .map(|f| f.payload.num_bytes_written())
            .sum();
        let mut out = BitBuffer::init("normal-reassembly", total_bytes + 1);
        for frag in &st.incomingbufs {
            out.write_bits_from(frag.payload.data(), 0, frag.payload.num_bits_written());
        }
        st.clear_incoming();
        Some(out.data().to_vec())
    }

    /// Drain a fully-assembled file-stream inbound group, validate and write
    /// it out (§4.7). `Ok` covers both a fresh write and a harmless
    /// already-exists skip; `Err` means the filename itself was rejected.
    /// Either way the inbound queue is cleared.
    pub fn copy_file_fragments<F: FragmentFileIo>(
        &mut self,
        fileio: &F,
    ) -> Result<FileCopyOutcome, FileRejectReason> {
        let st = self.fragments.stream_mut(Stream::File);
        if st.incomingbufs.is_empty() {
            warn!("copy_file_fragments called with nothing queued");
            st.incomingready = false;
            return Err(FileRejectReason::EmptyName);
        }

        let first = st.incomingbufs[0].clone();
        let mut reader =
            BitBuffer::start_reading(first.payload.data().to_vec(), first.payload.num_bits_written());
        let filename = reader.read_string();
        let name_bits = reader.num_bits_read();

        if filename.is_empty() {
            st.clear_incoming();
            return Err(FileRejectReason::EmptyName);
        }
        if filename.contains("..") {
            st.clear_incoming();
            return Err(FileRejectReason::PathTraversal);
        }
        if fileio.exists(&filename) {
            info!(filename = %filename, "inbound file already exists, discarding transfer");
            st.clear_incoming();
            return Ok(FileCopyOutcome::AlreadyExists { filename });
        }

        let rest_bits = first.payload.num_bits_written() - name_bits;
        let total_bytes: usize = st
            .incomingbufs
            .iter()
            .map(|f| f.payload.num_bytes_written())
            .sum();
        let mut out = BitBuffer::init("file-reassembly", total_bytes + 1);
        out.write_bits_from(first.payload.data(), name_bits, rest_bits);
        for frag in st.incomingbufs.iter().skip(1) {
            out.write_bits_from(frag.payload.data(), 0, frag.payload.num_bits_written());
        }
        let bytes = out.data().to_vec();
        let len = bytes.len();

        fileio
            .write_file(&filename, &bytes)
            .map_err(|_| FileRejectReason::AlreadyExists)?;
        st.clear_incoming();
        Ok(FileCopyOutcome::Written { filename, bytes: len })
    }

    /// Build and send the next outbound packet (§4.5 steps 1-9), with
    /// `unreliable_payload` treated as a whole number of bytes. A thin
    /// wrapper over [`Channel::transmit_bits`].
    pub fn transmit<S, F>(
        &mut self,
        socket: &mut S,
        fileio: &F,
        now: Instant,
        unreliable_payload: &[u8],
    ) -> Result<TransmitOutcome, ChannelError>
    where
        S: PacketSocket<A>,
        F: FragmentFileIo,
    {
        self.transmit_bits(socket, fileio, now, unreliable_payload, unreliable_payload.len() * 8)
    }

    /// Build and send the next outbound packet (§4.5 steps 1-9): latches a
    /// new reliable payload if none is outstanding, otherwise resends the
    /// latched one; appends the first `unreliable_bits` bits of
    /// `unreliable_payload` if they fit; applies the leaky-bucket choke.
    ///
    /// §9: the wire is bit-aligned throughout, so the unreliable tail isn't
    /// restricted to whole bytes — `unreliable_bits` may be any value up to
    /// `unreliable_payload.len() * 8`.
    pub fn transmit_bits<S, F>(
        &mut self,
        socket: &mut S,
        fileio: &F,
        now: Instant,
        unreliable_payload: &[u8],
        unreliable_bits: usize,
    ) -> Result<TransmitOutcome, ChannelError>
    where
        S: PacketSocket<A>,
        F: FragmentFileIo,
    {
        let unreliable_bits = unreliable_bits.min(unreliable_payload.len() * 8);
        if self.message.overflowed() {
            return Err(ChannelError::MessageOverflow {
                capacity: self.message.max_bytes(),
            });
        }

        let loopback = self.is_local();

        // Step 2: does the currently-latched reliable need resending?
        let retransmit_due = self.reliable_length > 0
            && self.incoming_acknowledged > self.last_reliable_sequence
            && self.incoming_reliable_acknowledged != self.reliable_sequence;
        let mut send_reliable = retransmit_due;
        let resending = retransmit_due;

        let mut descriptors: [Option<FragmentDescriptor>; MAX_STREAMS] = [None, None];

        if self.reliable_length == 0 {
            // 3.a: anything too big for the regular path becomes fragments.
            let frag_size_bytes = if loopback {
                NET_MAX_PAYLOAD.saturating_sub(MAX_MSGLEN)
            } else {
                MAX_MSGLEN
            };
            if self.message.num_bytes_written() > frag_size_bytes {
                let snapshot = self.message_snapshot();
                self.create_fragments(&snapshot, None);
                self.message.clear();
            }

            // 3.b: pull a waiting group into the active slot if it's free.
            self.fragments.promote_all();

            // 3.c: per-packet scratch for this build only.
            let mut frag_startpos = [0usize; MAX_STREAMS];

            // 3.d/3.e: choose what rides as the regular reliable payload.
            let mut send_from_regular = self.message.num_bits_written() > 0;
            let send_from_frag = [
                !self.fragments.stream(Stream::Normal).fragbufs.is_empty(),
                !self.fragments.stream(Stream::File).fragbufs.is_empty(),
            ];
            if send_from_regular && send_from_frag[Stream::Normal as usize] {
                send_from_regular = false;
            }
            if send_from_regular && self.message.num_bytes_written() > MAX_RELIABLE_PAYLOAD {
                let snapshot = self.message_snapshot();
                self.create_fragments(&snapshot, None);
                self.message.clear();
                send_from_regular = false;
            }

            // 3.f: anything to send at all flips the parity and latches.
            if send_from_regular || send_from_frag[0] || send_from_frag[1] {
                self.reliable_sequence = !self.reliable_sequence;
                send_reliable = true;
            }

            let mut reliable_buf = BitBuffer::init("reliable-build", MAX_RELIABLE_PAYLOAD * 2);

            // 3.g: regular bytes go first if selected.
            if send_from_regular {
                reliable_buf.write_bits_from(
                    self.message.data(),
                    0,
                    self.message.num_bits_written(),
                );
                for slot in frag_startpos.iter_mut() {
                    *slot = reliable_buf.num_bits_written();
                }
                // Latched into reliable_buf above; new application writes
                // must start from empty, not accumulate on top of what was
                // just sent (§4.5: "new writes accumulate into message but
                // cannot be emitted while reliable_length > 0").
                self.message.clear();
            }

            // 3.h: splice in one head fragment per stream, if it fits.
            for s in Stream::ALL {
                let idx = s as usize;
                if !send_from_frag[idx] {
                    continue;
                }
                let fits = {
                    let head = self.fragments.stream(s).fragbufs.front().unwrap();
                    let frag_bytes = if head.isfile && !head.isbuffer {
                        head.size
                    } else {
                        head.payload.num_bytes_written()
                    };
                    reliable_buf.num_bytes_written() + frag_bytes < MAX_RELIABLE_PAYLOAD
                };
                if !fits {
                    continue;
                }

                let mut frag = self.fragments.stream_mut(s).fragbufs.pop_front().unwrap();
                if frag.isfile && !frag.isbuffer {
                    let bytes = fileio
                        .read_at(frag.filename.as_deref().unwrap_or(""), frag.foffset, frag.size)
                        .unwrap_or_default();
                    for b in &bytes {
                        frag.payload.write_byte(*b);
                    }
                }
                let frag_bits = frag.payload.num_bits_written();
                reliable_buf.write_bits_from(frag.payload.data(), 0, frag_bits);

                descriptors[idx] = Some(FragmentDescriptor {
                    bufferid: frag.bufferid,
                    frag_offset: frag_startpos[idx] as u32,
                    frag_length: frag_bits as u32,
                });
                for later in (idx + 1)..MAX_STREAMS {
                    frag_startpos[later] += frag_bits;
                }
            }

            if send_reliable {
                self.reliable_buf = reliable_buf.data().to_vec();
                self.reliable_bit_len = reliable_buf.num_bits_written();
                self.reliable_length = self.reliable_buf.len().max(1);
            }
        }

        // Step 4: header.
        let has_fragments = descriptors.iter().any(Option::is_some);
        let header = PacketHeader {
            sequence: self.outgoing_sequence,
            reliable: send_reliable,
            fragmented: has_fragments,
            acknowledged: self.incoming_sequence,
            reliable_ack: self.incoming_reliable_sequence,
        };
        let mut packet = BitBuffer::init(
            "outbound-packet",
            FRAGMENT_MAX_SIZE + MAX_RELIABLE_PAYLOAD + 64,
        );
        header.encode(&mut packet);
        if self.role == Role::Client {
            packet.write_word(self.qport);
        }
        if has_fragments {
            for s in Stream::ALL {
                write_stream_slot(&mut packet, descriptors[s as usize].as_ref());
            }
        }
        self.outgoing_sequence += 1;

        // Step 5: reliable bits, if any.
        if send_reliable {
            packet.write_bits_from(&self.reliable_buf, 0, self.reliable_bit_len);
            self.last_reliable_sequence = self.outgoing_sequence - 1;
        }

        // Step 6: unreliable payload, budget-limited. Bit-granular: a
        // caller passing a non-byte-aligned `unreliable_bits` only spends
        // that many bits of `packet`'s tail, not a whole extra byte.
        let max_send_bits = (if loopback || !resending {
            NET_MAX_PAYLOAD
        } else {
            FRAGMENT_MAX_SIZE
        }) * 8;
        let bits_left = max_send_bits.saturating_sub(packet.num_bits_written());
        if unreliable_bits <= bits_left {
            packet.write_bits_from(unreliable_payload, 0, unreliable_bits);
        } else {
            warn!(
                bits = unreliable_bits,
                bits_left, "dropping unreliable payload, does not fit this packet"
            );
        }

        // Step 7: pad tiny packets so the receiver always has enough to
        // parse.
        if !loopback && packet.num_bytes_written() < 16 {
            let pad = 16 - packet.num_bytes_written();
            for _ in 0..pad {
                packet.write_byte(SVC_NOP);
            }
        }

        // Step 8: flow accounting and the leaky-bucket choke.
        let packet_bytes = packet.num_bytes_written();
        self.flow_outgoing.add_bytes(now, packet_bytes + UDP_HEADER_SIZE);
        self.flow_outgoing.update(now);
        if !(loopback && !self.choke_loopback) {
            let seconds_per_byte = 1.0 / self.rate as f64;
            let cost = Duration::from_secs_f64((packet_bytes + UDP_HEADER_SIZE) as f64 * seconds_per_byte);
            self.cleartime = std::cmp::max(self.cleartime, now) + cost;
        }

        // Step 9: send.
        socket.send_packet(&self.remote_address, packet.data());

        Ok(TransmitOutcome {
            bytes_sent: packet_bytes,
            sent_reliable: send_reliable,
            had_fragments: has_fragments,
        })
    }

    /// A throwaway read-only snapshot of `self.message`, used when splitting
    /// it into fragments without fighting the borrow checker over
    /// `self.fragments` being mutated in the same scope.
    fn message_snapshot(&self) -> BitBuffer {
        BitBuffer::start_reading(self.message.data().to_vec(), self.message.num_bits_written())
    }

    /// Parse one inbound packet (§4.5 step 10, §4.6 Validate, §4.7
    /// reassembly). Returns `accepted: false` for anything silently
    /// dropped — wrong origin, too short, stale/duplicate sequence, or
    /// failed fragment validation.
    pub fn process(&mut self, from: &A, data: &[u8], now: Instant) -> ProcessOutcome {
        if *from != self.remote_address {
            return ProcessOutcome::default();
        }
        if data.len() * 8 < PacketHeader::ENCODED_LEN * 8 {
            return ProcessOutcome::default();
        }

        let mut buf = BitBuffer::start_reading(data.to_vec(), data.len() * 8);
        let header = PacketHeader::decode(&mut buf);

        if self.role == Role::Server {
            let _qport = buf.read_short();
        }

        let mut descriptors: [Option<FragmentDescriptor>; MAX_STREAMS] = [None, None];
        if header.fragmented {
            for s in Stream::ALL {
                descriptors[s as usize] = read_stream_slot(&mut buf);
            }
            if !self.validate(&descriptors, &buf) {
                return ProcessOutcome::default();
            }
        }

        if header.sequence <= self.incoming_sequence {
            if self.show_drop {
                debug!(
                    sequence = header.sequence,
                    last = self.incoming_sequence, "dropping stale/duplicate packet"
                );
            }
            return ProcessOutcome::default();
        }
        let net_drop = header.sequence - self.incoming_sequence - 1;

        if header.reliable_ack == self.reliable_sequence
            && header.acknowledged >= self.last_reliable_sequence
        {
            self.reliable_length = 0;
        }

        self.incoming_sequence = header.sequence;
        self.incoming_acknowledged = header.acknowledged;
        self.incoming_reliable_acknowledged = header.reliable_ack;
        if header.reliable {
            self.incoming_reliable_sequence = !self.incoming_reliable_sequence;
        }
        self.last_received = now;

        self.flow_incoming.add_bytes(now, data.len() + UDP_HEADER_SIZE);
        self.flow_incoming.update(now);

        let payload_start_bit = buf.num_bits_read();
        let mut reassembly_gap = false;

        for s in Stream::ALL {
            let idx = s as usize;
            let Some(desc) = descriptors[idx] else {
                continue;
            };
            let abs_bit = payload_start_bit + desc.frag_offset as usize;
            let raw = buf.data().to_vec();

            let mut frag = self
                .fragments
                .stream(s)
                .find_by_id(bufferid_index(desc.bufferid))
                .cloned()
                .unwrap_or_else(|| Fragment::alloc(desc.bufferid));
            frag.payload.clear();
            frag.payload
                .write_bits_from(&raw, abs_bit, desc.frag_length as usize);
            self.fragments.stream_mut(s).insert_sorted_by_id(frag);

            let st = self.fragments.stream_mut(s);
            if st.is_group_complete() {
                st.incomingready = true;
            } else if let Some(first) = st.incomingbufs.first() {
                let expected = first.fragment_count() as usize;
                if st.incomingbufs.len() == expected {
                    reassembly_gap = true;
                }
            }

            buf.excise_bits(abs_bit, desc.frag_length as usize);
            buf.seek_read_to_bit(payload_start_bit);
            for later in (idx + 1)..MAX_STREAMS {
                if let Some(ref mut later_desc) = descriptors[later] {
                    later_desc.frag_offset -= desc.frag_length;
                }
            }
        }

        buf.seek_read_to_bit(payload_start_bit);
        let payload = if buf.num_bits_left() > 0 {
            Some(buf.read_remaining_bytes())
        } else {
            None
        };

        ProcessOutcome {
            accepted: true,
            net_drop,
            reassembly_gap,
            payload,
        }
    }

    /// Reject a fragmented packet outright if its descriptors are internally
    /// inconsistent, oversized, or would read past the packet (§4.6). Ids
    /// here are 0-based (`index < count`), an internal convention equivalent
    /// to the wire's 1-based one but consistent with [`crate::pool`].
    fn validate(
        &self,
        descriptors: &[Option<FragmentDescriptor>; MAX_STREAMS],
        buf: &BitBuffer,
    ) -> bool {
        let loopback = self.is_local();
        let bits_already_read = buf.num_bits_read();
        let packet_max_bits = buf.max_bits();

        for (idx, maybe) in descriptors.iter().enumerate() {
            let Some(desc) = maybe else { continue };
            let s = Stream::ALL[idx];
            let max_fragments = self.fragments.max_fragments(s);
            let count = bufferid_count(desc.bufferid) as usize;
            let id = bufferid_index(desc.bufferid) as usize;

            if count == 0 || count > max_fragments || id >= count {
                return false;
            }
            if desc.frag_length == 0 {
                return false;
            }
            let chunk_limit = if s == Stream::Normal && loopback {
                NET_MAX_PAYLOAD
            } else {
                FRAGMENT_MAX_SIZE
            };
            if (desc.frag_length as usize).div_ceil(8) > chunk_limit {
                return false;
            }
            if (desc.frag_offset as usize).div_ceil(8) > NET_MAX_PAYLOAD - 1 {
                return false;
            }
            if bits_already_read + desc.frag_offset as usize + desc.frag_length as usize
                > packet_max_bits
            {
                return false;
            }
            // Streams are always packed in `Stream::ALL` order on the wire
            // (§4.5 step 3.h splices normal before file), so a conforming
            // sender never places a later stream's range before an earlier
            // one's. Requiring that order here — not just non-overlap —
            // keeps the `later_desc.frag_offset -= desc.frag_length`
            // adjustment in `process` safe from underflow on a malformed
            // packet that violates it.
            for later in (idx + 1)..MAX_STREAMS {
                if let Some(other) = &descriptors[later] {
                    let a1 = desc.frag_offset + desc.frag_length;
                    let b0 = other.frag_offset;
                    if b0 < a1 {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Split raw bits into a waitlist-ready [`FragmentGroup`], chunked at
/// `chunk_bits` per fragment (at least one fragment even for an empty
/// message, matching `create_fragments` always producing a group).
fn build_fragment_group(
    data: &[u8],
    total_bits: usize,
    chunk_bits: usize,
    capacity_bytes: usize,
) -> FragmentGroup {
    let count = total_bits.div_ceil(chunk_bits).max(1) as u16;
    let mut group = FragmentGroup::default();
    let mut pos = 0usize;
    let mut idx = 0u16;
    loop {
        let take = chunk_bits.min(total_bits - pos);
        let mut frag = Fragment::alloc_with_capacity(make_bufferid(idx, count), capacity_bytes);
        frag.payload.write_bits_from(data, pos, take);
        group.push(frag);
        pos += take;
        idx += 1;
        if pos >= total_bits {
            break;
        }
    }
    group
}

fn prettify_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Sequence number reserved for out-of-band packets — both header words are
/// all-ones, which can never arise from a connected channel's sequence
/// counters (§4.1).
pub const OOB_SEQUENCE: u32 = 0xFFFF_FFFF;

/// Send a connectionless out-of-band packet: an all-ones sentinel header
/// followed by raw bytes, bypassing the channel entirely. Used for the
/// pre-connection handshake traffic this crate doesn't otherwise model.
pub fn out_of_band<A: PeerAddress, S: PacketSocket<A>>(socket: &mut S, to: &A, data: &[u8]) {
    let mut buf = BitBuffer::init("oob", data.len() + 4);
    buf.write_long(OOB_SEQUENCE);
    for &b in data {
        buf.write_byte(b);
    }
    socket.send_packet(to, buf.data());
}

/// Send an out-of-band *string* payload. Truncates at the first interior NUL
/// byte, if any, since the wire string format is itself NUL-terminated and a
/// stray interior NUL would otherwise desync the receiver's parse.
pub fn out_of_band_print<A: PeerAddress, S: PacketSocket<A>>(socket: &mut S, to: &A, message: &str) {
    let truncated = match message.find('\0') {
        Some(at) => &message[..at],
        None => message,
    };
    out_of_band(socket, to, truncated.as_bytes());
}
