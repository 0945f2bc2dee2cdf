//! Per-sender interval tracking and arrival prediction.
//!
//! A profile is what one receiver has learned about one sender: where it
//! was first heard, how often it transmits, and when the next packet should
//! land. Gap samples live in a bounded window; the all-time minimum is kept
//! anchored inside the window so the predictor never forgets the tightest
//! cadence it has seen.

use std::collections::{HashMap, VecDeque};

use super::types::{INITIAL_MIN_INTERVAL_MS, INTERVAL_HISTORY_CAPACITY, MIN_SCHEDULE_GAP_MS};

/// Accumulated knowledge about one observed sender.
#[derive(Debug, Clone)]
pub struct SenderProfile {
    id: u32,
    /// Poll position (into the owning receiver's assigned slice) where this
    /// sender was first heard. Never updated afterwards.
    channel_index: usize,
    /// Timestep of the most recent observation. Non-decreasing.
    last_sent_ms: u64,
    /// Packets observed from this sender by this receiver.
    send_times: u64,
    /// Last `INTERVAL_HISTORY_CAPACITY` observed gaps, oldest first.
    interval_history: VecDeque<u64>,
    /// Observation count per distinct gap value over the current window.
    interval_frequency: HashMap<u64, u64>,
    /// Smallest gap ever observed, not just within the window.
    min_interval_ms: u64,
    /// Predicted absolute arrival timestep; `-1` until two packets have
    /// been seen.
    next_send_ms: i64,
}

impl SenderProfile {
    /// Profile created on the first sighting of a sender.
    pub fn new(id: u32, channel_index: usize, now: u64) -> Self {
        Self {
            id,
            channel_index,
            last_sent_ms: now,
            send_times: 1,
            interval_history: VecDeque::with_capacity(INTERVAL_HISTORY_CAPACITY),
            interval_frequency: HashMap::new(),
            min_interval_ms: INITIAL_MIN_INTERVAL_MS,
            next_send_ms: -1,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn channel_index(&self) -> usize {
        self.channel_index
    }

    pub fn last_sent_ms(&self) -> u64 {
        self.last_sent_ms
    }

    pub fn send_times(&self) -> u64 {
        self.send_times
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    pub fn next_send_ms(&self) -> i64 {
        self.next_send_ms
    }

    pub fn history_len(&self) -> usize {
        self.interval_history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = u64> + '_ {
        self.interval_history.iter().copied()
    }

    pub fn frequency_of(&self, interval: u64) -> u64 {
        self.interval_frequency.get(&interval).copied().unwrap_or(0)
    }

    /// Record one observed gap.
    ///
    /// When the window is full, one element is evicted: the oldest, unless
    /// the oldest is the running minimum, in which case the second-oldest
    /// goes instead so the minimum stays represented in the window.
    pub fn observe(&mut self, interval: u64) {
        if interval < self.min_interval_ms {
            self.min_interval_ms = interval;
        }
        if self.interval_history.len() == INTERVAL_HISTORY_CAPACITY {
            if self.interval_history.front() == Some(&self.min_interval_ms) {
                if let Some(second) = self.interval_history.remove(1) {
                    self.forget(second);
                }
            } else if let Some(oldest) = self.interval_history.pop_front() {
                self.forget(oldest);
            }
        }
        self.interval_history.push_back(interval);
        *self.interval_frequency.entry(interval).or_insert(0) += 1;
    }

    /// Record a fresh observation at `now`: the gap since the previous one
    /// goes into the window and the next arrival is re-planned. Returns the
    /// updated observation count.
    pub fn record_observation(&mut self, now: u64) -> u64 {
        self.observe(now - self.last_sent_ms);
        self.last_sent_ms = now;
        self.send_times += 1;
        self.plan_next_arrival(now);
        self.send_times
    }

    /// Most recent gap, if any has been observed.
    pub fn last_interval(&self) -> Option<u64> {
        self.interval_history.back().copied()
    }

    /// Mean gap over the current window.
    pub fn average_interval(&self) -> Option<f64> {
        if self.interval_history.is_empty() {
            return None;
        }
        let sum: u64 = self.interval_history.iter().sum();
        Some(sum as f64 / self.interval_history.len() as f64)
    }

    /// Most frequent gap in the window. Ties resolve arbitrarily.
    pub fn mode_interval(&self) -> Option<u64> {
        self.interval_frequency
            .iter()
            .max_by_key(|&(_, count)| count)
            .map(|(&interval, _)| interval)
    }

    /// Plan the next catch after an observation at `now`: one minimum
    /// interval out, pushed past the one-second floor so a prediction never
    /// forces an immediate retune.
    fn plan_next_arrival(&mut self, now: u64) {
        let step = self.min_interval_ms.max(1);
        let mut next = now + step;
        while next - now < MIN_SCHEDULE_GAP_MS {
            next += step;
        }
        self.next_send_ms = next as i64;
    }

    /// Gap from `now` to the predicted arrival. A prediction that has
    /// fallen behind (missed schedule) is first rolled forward by whole
    /// minimum intervals until it is at or past `now`. Without a prediction
    /// the result is negative.
    pub fn schedule_gap(&mut self, now: u64) -> i64 {
        if self.next_send_ms > 0 {
            let step = self.min_interval_ms.max(1) as i64;
            while self.next_send_ms < now as i64 {
                self.next_send_ms += step;
            }
        }
        self.next_send_ms - now as i64
    }

    fn forget(&mut self, interval: u64) {
        if let Some(count) = self.interval_frequency.get_mut(&interval) {
            *count -= 1;
            if *count == 0 {
                self.interval_frequency.remove(&interval);
            }
        }
    }
}
