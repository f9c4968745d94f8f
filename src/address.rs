//! # Peer Address
//!
//! The channel treats the remote endpoint as opaque (§3): it only ever needs
//! to compare two addresses for equality and ask whether one is loopback, to
//! decide the choke-bypass and fragment-size promotions in §4.4/§4.5. The
//! concrete transport (UDP, in-process channel, simulated network) plugs in
//! its own address type by implementing [`PeerAddress`].

use std::net::{IpAddr, SocketAddr};

/// A comparable, loopback-aware peer identifier.
///
/// The blanket requirement is `Clone + PartialEq + Debug` so a [`Channel`]
/// can stash one as `remote_address` and compare it against the sender of
/// every inbound datagram (§4.5 step 1).
///
/// [`Channel`]: crate::channel::Channel
pub trait PeerAddress: Clone + PartialEq + std::fmt::Debug {
    /// Whether this address routes over the host's loopback interface.
    /// Loopback peers bypass the bandwidth choke (§5) and use the larger
    /// `NET_MAX_PAYLOAD` fragment/send sizes (§4.4, §4.5) unless configured
    /// otherwise.
    fn is_loopback(&self) -> bool;
}

impl PeerAddress for SocketAddr {
    fn is_loopback(&self) -> bool {
        match self.ip() {
            IpAddr::V4(v4) => v4.is_loopback(),
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }
}
