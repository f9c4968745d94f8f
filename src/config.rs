//! # Channel Configuration
//!
//! The §6 cvars (`net_showpackets`, `net_chokeloop`, `net_showdrop`,
//! `net_speeds`, `net_qport`), collected as constructor arguments instead of
//! console globals — there is no console subsystem in this crate, so a
//! `ChannelConfig` plays the role the original engine's cvar tree did,
//! matching how the teacher crate threads `SenderConfig`/`ReceiverConfig`
//! structs through rather than reaching for process-wide state.

use rand::Rng;

use crate::wire::DEFAULT_RATE;

/// `net_showpackets` verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowPackets {
    #[default]
    Off,
    Summary,
    Verbose,
}

/// Tunables consumed by [`crate::channel::Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Outbound bytes/sec ceiling for the leaky-bucket choke (§4.5 step 8).
    pub rate: u32,
    /// `net_chokeloop`: when `false` (default), loopback peers bypass the
    /// choke entirely; when `true`, the choke applies even to loopback
    /// traffic.
    pub choke_loopback: bool,
    /// `net_showdrop`: log duplicate/out-of-order/stale packet rejections.
    pub show_drop: bool,
    /// `net_showpackets`: packet-level tracing verbosity.
    pub show_packets: ShowPackets,
    /// `net_speeds`: whether `report_flow` emits anything (§4.8).
    pub net_speeds: bool,
    /// `net_qport`: this client's stable NAT-disambiguation identifier
    /// (§4.5, §9). Servers ignore this field; it is only written on
    /// client-origin packets.
    pub qport: u16,
}

impl ChannelConfig {
    /// Build a config with a freshly randomized `qport`, as the original
    /// engine does at client startup (`Netchan_Init`'s `Q_rand() % 65535 + 1`).
    pub fn with_random_qport() -> Self {
        ChannelConfig {
            qport: rand::rng().random_range(1u16..=65535),
            ..Self::default()
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            rate: DEFAULT_RATE,
            choke_loopback: false,
            show_drop: false,
            show_packets: ShowPackets::Off,
            net_speeds: false,
            qport: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_qport_is_in_range() {
        for _ in 0..64 {
            let cfg = ChannelConfig::with_random_qport();
            assert!(cfg.qport >= 1);
        }
    }

    #[test]
    fn default_rate_matches_protocol_constant() {
        assert_eq!(ChannelConfig::default().rate, DEFAULT_RATE);
    }
}
