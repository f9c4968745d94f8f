//! # netchan
//!
//! A reliable-with-fragmentation datagram channel for game-engine style
//! netcode: unreliable messages, a single-outstanding reliable message
//! latched and resent until acknowledged (no cumulative acks), two
//! independent fragmentation streams for oversized messages and file
//! transfers, a leaky-bucket bandwidth choke, and `qport`-based NAT
//! disambiguation for client-origin traffic.
//!
//! ## Crate structure
//!
//! - [`bitbuf`] — Bit-level (not byte-aligned) read/write buffer; the
//!   codec primitive everything else is built on.
//! - [`wire`] — Packet header and fragment descriptor encode/decode.
//! - [`pool`] — Per-stream fragment bookkeeping (outbound waitlists,
//!   inbound reassembly).
//! - [`stats`] — Flow metering for `net_speeds`-style bandwidth reporting.
//! - [`config`] — Channel tunables (`net_*` cvars as a plain struct).
//! - [`address`] — The minimal peer-address contract the channel needs.
//! - [`io`] — Socket/filesystem collaborator traits, plus in-memory test
//!   doubles.
//! - [`error`] — The channel's error and rejection taxonomy.
//! - [`channel`] — [`channel::Channel`], the reliable-with-fragmentation
//!   state machine tying the above together, and the out-of-band helpers.

pub mod address;
pub mod bitbuf;
pub mod channel;
pub mod config;
pub mod error;
pub mod io;
pub mod pool;
pub mod stats;
pub mod wire;
