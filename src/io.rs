//! # Socket & Filesystem Collaborators
//!
//! The channel's core is pure protocol logic; actually moving bytes across a
//! socket or a disk is delegated to these two small traits (§5 ambient
//! note). This keeps [`crate::channel::Channel`] testable without a real UDP
//! socket or a real filesystem — the test doubles below stand in for both in
//! the integration tests and doctests.

use std::collections::HashMap;
use std::io;

use crate::address::PeerAddress;

/// The out-of-scope UDP socket layer (§1), reduced to the one operation the
/// channel needs: handing a fully-assembled packet to the wire.
pub trait PacketSocket<A: PeerAddress> {
    fn send_packet(&mut self, to: &A, data: &[u8]);
}

/// The out-of-scope filesystem (§1), reduced to the three operations
/// `create_file_fragments`/`copy_file_fragments` need: reading a chunk of a
/// source file at transmit time, and writing/checking the reassembled file
/// at receive time (§4.4, §4.7).
pub trait FragmentFileIo {
    /// Read `len` bytes starting at `offset` from `filename`. Used lazily at
    /// packet-build time for disk-backed fragments (§4.5 step 3.h).
    fn read_at(&self, filename: &str, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Whether `filename` already exists at the destination (§4.7, §7
    /// `FileReject::AlreadyExists`).
    fn exists(&self, filename: &str) -> bool;

    /// Write a fully reassembled file to `filename`.
    fn write_file(&self, filename: &str, data: &[u8]) -> io::Result<()>;

    /// Total size of `filename`, used to plan the fragment group before any
    /// bytes are read (§4.4 `create_file_fragments`).
    fn file_size(&self, filename: &str) -> io::Result<u64>;
}

/// An in-memory [`PacketSocket`] for tests: every sent packet is appended to
/// a per-destination queue instead of touching a real socket. A lossy
/// transport can be layered on top by dropping packets before they're
/// delivered to the matching [`Channel::process`](crate::channel::Channel::process) call.
#[derive(Debug, Default)]
pub struct LoopbackSocket<A: PeerAddress + std::hash::Hash + Eq> {
    pub sent: HashMap<A, Vec<Vec<u8>>>,
}

impl<A: PeerAddress + std::hash::Hash + Eq> LoopbackSocket<A> {
    pub fn new() -> Self {
        LoopbackSocket {
            sent: HashMap::new(),
        }
    }

    /// Drain every packet queued for `to` in emission order.
    pub fn take_sent(&mut self, to: &A) -> Vec<Vec<u8>> {
        self.sent.remove(to).unwrap_or_default()
    }
}

impl<A: PeerAddress + std::hash::Hash + Eq> PacketSocket<A> for LoopbackSocket<A> {
    fn send_packet(&mut self, to: &A, data: &[u8]) {
        self.sent.entry(to.clone()).or_default().push(data.to_vec());
    }
}

/// An in-memory [`FragmentFileIo`] for tests: files live in a `HashMap`
/// rather than on disk.
#[derive(Debug, Default)]
pub struct InMemoryFileIo {
    files: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileIo {
    pub fn new() -> Self {
        InMemoryFileIo::default()
    }

    /// Seed a source file for a sending channel to fragment and transmit.
    pub fn put(&self, filename: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(filename.to_string(), data);
    }

    /// Fetch whatever has been written to `filename`, if anything.
    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(filename).cloned()
    }
}

impl FragmentFileIo for InMemoryFileIo {
    fn read_at(&self, filename: &str, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let files = self.files.lock().unwrap();
        let data = files
            .get(filename)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, filename.to_string()))?;
        let start = offset as usize;
        let end = (start + len).min(data.len());
        Ok(data[start.min(data.len())..end].to_vec())
    }

    fn exists(&self, filename: &str) -> bool {
        self.files.lock().unwrap().contains_key(filename)
    }

    fn write_file(&self, filename: &str, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), data.to_vec());
        Ok(())
    }

    fn file_size(&self, filename: &str) -> io::Result<u64> {
        let files = self.files.lock().unwrap();
        files
            .get(filename)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, filename.to_string()))
    }
}
