//! # Flow Meter
//!
//! Per-direction bandwidth metering used by the transmit engine's leaky
//! bucket choke (`cleartime`, §4.5) and surfaced to callers via
//! [`Channel::flow_stats`](crate::channel::Channel::flow_stats) for
//! `net_speeds`-style diagnostics.
//!
//! Bytes are tallied into fixed-width 100ms slots in a ring buffer exactly
//! [`MASK_LATENT`] + 1 samples wide — a bounded alternative to a
//! retain-by-cutoff counter, sized so a stalled channel's meter cannot grow
//! without limit while it waits for traffic.

use quanta::Instant;
use serde::Serialize;
use std::time::Duration;

/// Ring buffer size - 1. 32 slots at [`FLOW_INTERVAL`] each cover 3.2s of
/// history.
pub const MASK_LATENT: usize = 31;

/// Width of one flow-accounting slot.
pub const FLOW_INTERVAL: Duration = Duration::from_millis(100);

/// Smoothing factor applied to the windowed rate before it is reported,
/// matching the original engine's `FLOW_AVG` constant.
pub const FLOW_AVG: f64 = 2.0 / 3.0;

/// Exponentially weighted moving average, reused unchanged for the flow
/// meter's rate smoothing.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0, 1]");
        Ewma {
            alpha,
            value: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

/// A single 100ms accounting slot: total payload bytes seen in that slot.
#[derive(Debug, Clone, Copy, Default)]
struct FlowSample {
    bytes: u32,
}

/// Fixed-size ring of [`MASK_LATENT`] + 1 [`FlowSample`]s plus the smoothed
/// rate derived from them.
#[derive(Debug, Clone)]
pub struct FlowMeter {
    samples: [FlowSample; MASK_LATENT + 1],
    slot_start: Instant,
    current: usize,
    smoothed_bps: Ewma,
    total_bytes: u64,
    total_packets: u64,
    nextcompute: Instant,
}

/// Snapshot suitable for `net_speeds`-style display or JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStats {
    pub bytes_per_second: f64,
    pub total_bytes: u64,
    pub total_packets: u64,
}

impl FlowMeter {
    pub fn new(now: Instant) -> Self {
        FlowMeter {
            samples: [FlowSample::default(); MASK_LATENT + 1],
            slot_start: now,
            current: 0,
            smoothed_bps: Ewma::new(FLOW_AVG),
            total_bytes: 0,
            total_packets: 0,
            nextcompute: now,
        }
    }

    /// Advance the ring to the slot that `now` falls in, zeroing any slots
    /// skipped over while the channel was idle.
    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.slot_start);
        let ticks = (elapsed.as_secs_f64() / FLOW_INTERVAL.as_secs_f64()).floor() as usize;
        if ticks == 0 {
            return;
        }
        let ticks = ticks.min(MASK_LATENT + 1);
        for _ in 0..ticks {
            self.current = (self.current + 1) & MASK_LATENT;
            self.samples[self.current] = FlowSample::default();
        }
        self.slot_start += FLOW_INTERVAL * ticks as u32;
    }

    /// Record `n` payload bytes sent or received at `now`.
    pub fn add_bytes(&mut self, now: Instant, n: usize) {
        self.advance(now);
        self.samples[self.current].bytes = self.samples[self.current].bytes.saturating_add(n as u32);
        self.total_bytes += n as u64;
        self.total_packets += 1;
    }

    /// Windowed average bytes/sec, smoothed by [`FLOW_AVG`]. Call
    /// periodically (the transmit/receive engines do this once per processed
    /// packet) to keep the smoothed value current even through idle periods.
    ///
    /// Recomputes at most once per [`FLOW_INTERVAL`]; calls in between return
    /// the last smoothed value unchanged, mirroring the original's
    /// `nextcompute` gate.
    pub fn update(&mut self, now: Instant) -> f64 {
        self.advance(now);
        if now.saturating_duration_since(self.nextcompute) < FLOW_INTERVAL {
            return self.smoothed_bps.value();
        }
        self.nextcompute = now + FLOW_INTERVAL;
        let window_secs = (MASK_LATENT + 1) as f64 * FLOW_INTERVAL.as_secs_f64();
        let sum: u32 = self.samples.iter().map(|s| s.bytes).sum();
        let instantaneous = sum as f64 / window_secs;
        self.smoothed_bps.update(instantaneous)
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.smoothed_bps.value()
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            bytes_per_second: self.smoothed_bps.value(),
            total_bytes: self.total_bytes,
            total_packets: self.total_packets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_first_sample_sets_value() {
        let mut ewma = Ewma::new(0.125);
        ewma.update(100.0);
        assert_eq!(ewma.value(), 100.0);
    }

    #[test]
    fn ewma_smooths_toward_new_value() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(100.0);
        let v = ewma.update(200.0);
        assert!((v - 150.0).abs() < 0.001, "EWMA 0.5 should average: got {v}");
    }

    #[test]
    fn ewma_reset() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(100.0);
        ewma.reset();
        assert_eq!(ewma.value(), 0.0);
    }

    #[test]
    fn flow_meter_accumulates_within_one_slot() {
        let now = Instant::now();
        let mut meter = FlowMeter::new(now);
        meter.add_bytes(now, 100);
        meter.add_bytes(now, 50);
        // `update` is throttled to at most once per FLOW_INTERVAL; step past
        // the gate to force a recompute.
        let rate = meter.update(now + FLOW_INTERVAL);
        assert!(rate > 0.0);
    }

    #[test]
    fn flow_meter_update_is_throttled_to_flow_interval() {
        let now = Instant::now();
        let mut meter = FlowMeter::new(now);
        meter.add_bytes(now, 1000);
        let first = meter.update(now + FLOW_INTERVAL);
        assert!(first > 0.0);

        // More bytes arrive, but barely any time has passed since the last
        // recompute: the smoothed value must not move yet.
        meter.add_bytes(now + FLOW_INTERVAL, 100_000);
        let still_gated = meter.update(now + FLOW_INTERVAL + Duration::from_millis(10));
        assert_eq!(still_gated, first);
    }

    #[test]
    fn flow_meter_ring_does_not_grow_unbounded() {
        let now = Instant::now();
        let mut meter = FlowMeter::new(now);
        let mut t = now;
        for _ in 0..10_000 {
            t += FLOW_INTERVAL;
            meter.add_bytes(t, 10);
        }
        // Ring is fixed-size regardless of how long the channel has run.
        assert_eq!(meter.samples.len(), MASK_LATENT + 1);
        assert_eq!(meter.total_packets, 10_000);
    }

    #[test]
    fn flow_meter_idle_period_zeroes_skipped_slots() {
        let now = Instant::now();
        let mut meter = FlowMeter::new(now);
        meter.add_bytes(now, 10_000);
        let later = now + FLOW_INTERVAL * (MASK_LATENT as u32 + 5);
        let rate = meter.update(later);
        // Old burst has fully rotated out of the window.
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn flow_stats_serialize_for_net_speeds_style_reporting() {
        let now = Instant::now();
        let mut meter = FlowMeter::new(now);
        meter.add_bytes(now, 1024);
        meter.update(now + FLOW_INTERVAL);
        let stats = meter.stats();

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"total_bytes\":1024"));
        assert!(json.contains("\"total_packets\":1"));
    }
}
