//! Periodic packet sources.
//!
//! A sender is bound to one channel for its whole life and emits one packet
//! whenever more than its interval has elapsed since the previous emission.
//! The first emission lands at `offset + interval + 1`.

use log::trace;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use super::channel::ChannelBank;
use super::types::Packet;

/// Fixed-interval emitter bound to one channel of the bank.
#[derive(Debug)]
pub struct Sender {
    enabled: bool,
    packet_id: u32,
    interval_ms: u64,
    last_emit_ms: u64,
    channel_index: usize,
    /// Per-emission Gaussian perturbation of the interval, when configured.
    jitter: Option<Normal<f64>>,
    /// Threshold for the next emission; re-drawn per emission when jittered.
    next_interval_ms: u64,
}

impl Sender {
    pub fn new(packet_id: u32, interval_ms: u64, initial_offset_ms: u64, channel_index: usize) -> Self {
        trace!("sender {packet_id}: created on channel {channel_index}");
        Self {
            enabled: true,
            packet_id,
            interval_ms,
            last_emit_ms: initial_offset_ms,
            channel_index,
            jitter: None,
            next_interval_ms: interval_ms,
        }
    }

    /// Enable Gaussian timing jitter with the given standard deviation (ms).
    pub fn set_jitter(&mut self, stddev_ms: f64) {
        if stddev_ms > 0.0 {
            // stddev is validated positive and finite by the scenario layer
            self.jitter = Normal::new(0.0, stddev_ms).ok();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn channel_index(&self) -> usize {
        self.channel_index
    }

    /// Emit at most one packet this tick. Returns the emitted packet for
    /// caller bookkeeping, `None` when disabled or still inside the interval.
    pub fn tick(&mut self, now: u64, bank: &mut ChannelBank, rng: &mut StdRng) -> Option<Packet> {
        if !self.enabled {
            return None;
        }
        if now <= self.last_emit_ms + self.next_interval_ms {
            return None;
        }

        self.last_emit_ms = now;
        if let Some(normal) = &self.jitter {
            let drawn = self.interval_ms as f64 + normal.sample(rng);
            // A jittered interval never collapses below one tick.
            self.next_interval_ms = drawn.round().max(1.0) as u64;
        }

        let packet = Packet::new(self.packet_id);
        bank.get_mut(self.channel_index).append(packet.clone());
        trace!(
            "sender {}: emitted on channel {} at {now}",
            self.packet_id, self.channel_index
        );
        Some(packet)
    }
}
