//! Type definitions for the simulation.
//!
//! Contains the data shared across the simulation core:
//! - Packet value type
//! - Receiver control states and their trace codes
//! - Per-tick trace samples recorded for plotting
//! - Tuning constants of the visitation policy

use serde::Serialize;

/// Number of observed gaps retained per sender profile. Older samples are
/// evicted, except that the all-time minimum stays anchored in the window.
pub const INTERVAL_HISTORY_CAPACITY: usize = 100;

/// Predicted arrivals closer than this (ms) do not justify a retune; the
/// prediction is pushed out by whole minimum intervals instead.
pub const MIN_SCHEDULE_GAP_MS: u64 = 1000;

/// A predicted arrival must land within this window (ms) ahead of the
/// current tick for the receiver to start a schedule detour.
pub const SCHEDULE_WINDOW_MS: i64 = 20;

/// A sender silent for longer than this (one hour) is dropped from the
/// profile map during the schedule probe.
pub const STALE_SENDER_MS: u64 = 3_600_000;

/// Upper bound a fresh profile assumes for the shortest gap (one hour).
/// The first measured interval replaces it immediately.
pub const INITIAL_MIN_INTERVAL_MS: u64 = 3_600_000;

/// Immutable payload-free packet: sender identity plus coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sender_id: u32,
    pub x: f64,
    pub y: f64,
}

impl Packet {
    /// Packet from a sender with no position information.
    pub fn new(sender_id: u32) -> Self {
        Self {
            sender_id,
            x: 0.0,
            y: 0.0,
        }
    }
}

/// Receiver control states.
///
/// `Dwell` doubles as plain idling in pure-schedule mode, where the
/// receiver listens to nothing between scheduled catches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Listening on the current poll channel, accruing dwell time.
    Dwell,
    /// Retuning to a new poll channel; not listening.
    Switch,
    /// Listening on a predicted channel for a predicted sender.
    Schedule,
    /// Retuning to a predicted channel; not listening.
    SwitchToSchedule,
}

impl ReceiverState {
    /// Stable code used by the trace export (plotting contract).
    pub fn code(self) -> u8 {
        match self {
            ReceiverState::Dwell => 0,
            ReceiverState::Switch => 1,
            ReceiverState::Schedule => 2,
            ReceiverState::SwitchToSchedule => 3,
        }
    }
}

/// One per-tick trace record: the state the tick terminated in and whether
/// a packet was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceSample {
    pub state: u8,
    pub received: bool,
}

impl TraceSample {
    pub fn new(state: ReceiverState, received: bool) -> Self {
        Self {
            state: state.code(),
            received,
        }
    }
}
