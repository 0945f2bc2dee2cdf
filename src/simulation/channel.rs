//! Narrowband channels and the channel bank.
//!
//! A channel is a FIFO of pending packets with a listen flag and three
//! monotonically increasing counters (`sent`, `received`, `lost`). The bank
//! is a fixed-size ordered collection created once per simulation; channels
//! are never added or removed.

use std::collections::VecDeque;

use super::types::Packet;

/// One narrowband channel: pending packets in arrival order, a listen flag
/// managed by at most one receiver at a time, and loss accounting.
#[derive(Debug, Default)]
pub struct Channel {
    pending: VecDeque<Packet>,
    listening: bool,
    sent: u64,
    received: u64,
    lost: u64,
}

impl Channel {
    pub fn listen(&mut self) {
        self.listening = true;
    }

    pub fn quit_listen(&mut self) {
        self.listening = false;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Enqueue a packet, counting it as sent.
    pub fn append(&mut self, packet: Packet) {
        self.pending.push_back(packet);
        self.sent += 1;
    }

    /// Dequeue the oldest pending packet, counting it as received.
    pub fn pop(&mut self) -> Option<Packet> {
        let packet = self.pending.pop_front();
        if packet.is_some() {
            self.received += 1;
        }
        packet
    }

    /// Drop every pending packet, counting each as lost.
    pub fn mark_lost_all(&mut self) {
        self.lost += self.pending.len() as u64;
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }
}

/// Fixed-size ordered sequence of channels indexed `0..N`.
#[derive(Debug)]
pub struct ChannelBank {
    channels: Vec<Channel>,
}

impl ChannelBank {
    pub fn new(num_channels: usize) -> Self {
        Self {
            channels: (0..num_channels).map(|_| Channel::default()).collect(),
        }
    }

    /// Panics on an out-of-range index (programmer error).
    pub fn get(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    /// Panics on an out-of-range index (programmer error).
    pub fn get_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// End-of-tick loss sweep: every channel nobody is listening to sheds
    /// its entire backlog. There is no history on unlistened channels.
    pub fn sweep_unlistened(&mut self) {
        for channel in &mut self.channels {
            if !channel.listening {
                channel.mark_lost_all();
            }
        }
    }

    /// Close the books after a run: anything still queued anywhere becomes
    /// lost, so `sent == received + lost` holds on every channel.
    pub fn drain_all(&mut self) {
        for channel in &mut self.channels {
            channel.mark_lost_all();
        }
    }

    /// Bank-wide `(sent, received, lost)` totals.
    pub fn totals(&self) -> (u64, u64, u64) {
        self.channels.iter().fold((0, 0, 0), |(s, r, l), ch| {
            (s + ch.sent, r + ch.received, l + ch.lost)
        })
    }
}
