//! Receiver control loop: polling dwells, retunes, and predictive catches.
//!
//! Each receiver owns one tuner. It walks its assigned channels in a
//! round-robin of dwell periods and, when scheduling is enabled, watches
//! its sender profiles for arrivals predicted within the next few
//! milliseconds, detouring to the predicted channel just in time.
//!
//! Channels are addressed through positions into the receiver's assigned
//! slice; `assigned[position]` is the bank index. In whole-bank modes the
//! two coincide.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

use log::debug;

use super::channel::ChannelBank;
use super::profile::SenderProfile;
use super::types::{Packet, ReceiverState, SCHEDULE_WINDOW_MS, STALE_SENDER_MS};

/// Profile map, optionally shared between receivers. Single-threaded;
/// runtime-checked borrows are enough to serialize access.
pub type SharedProfiles = Rc<RefCell<HashMap<u32, SenderProfile>>>;

/// Insertion-ordered set of poll positions known to have carried traffic,
/// optionally shared between receivers.
pub type SharedKnownChannels = Rc<RefCell<Vec<usize>>>;

/// State machine orchestrating one tuner over an assigned channel subset.
pub struct Receiver {
    index: usize,
    /// Bank indices this receiver may visit.
    assigned: Vec<usize>,
    /// Position the receiver intends to dwell on next.
    poll_index: usize,
    /// Position the tuner is currently on; diverges from `poll_index`
    /// during and just after a schedule detour.
    active_index: usize,
    state: ReceiverState,
    switch_time: u64,
    switch_timer: u64,
    expected_dwell_time: u64,
    dwell_timer: u64,
    max_schedule_timeout: u64,
    schedule_timer: u64,
    schedule_timeout_count: u64,
    profiles: SharedProfiles,
    known_channels: SharedKnownChannels,
    first_switch_loop: bool,
}

impl Receiver {
    /// `shared_profiles` / `shared_known_channels` wire this receiver into
    /// maps filled by another one; `None` gives it maps of its own.
    pub fn new(
        index: usize,
        assigned: Vec<usize>,
        switch_time: u64,
        dwell_time: u64,
        shared_profiles: Option<SharedProfiles>,
        shared_known_channels: Option<SharedKnownChannels>,
    ) -> Self {
        Self {
            index,
            assigned,
            poll_index: 0,
            active_index: 0,
            state: ReceiverState::Dwell,
            switch_time,
            switch_timer: 0,
            expected_dwell_time: dwell_time,
            dwell_timer: 0,
            max_schedule_timeout: dwell_time,
            schedule_timer: 0,
            schedule_timeout_count: 0,
            profiles: shared_profiles.unwrap_or_default(),
            known_channels: shared_known_channels.unwrap_or_default(),
            first_switch_loop: false,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn poll_index(&self) -> usize {
        self.poll_index
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn assigned_channels(&self) -> &[usize] {
        &self.assigned
    }

    pub fn schedule_timeout_count(&self) -> u64 {
        self.schedule_timeout_count
    }

    pub fn profiles(&self) -> Ref<'_, HashMap<u32, SenderProfile>> {
        self.profiles.borrow()
    }

    /// Bank index of a position. Panics when the position is out of range
    /// (programmer error).
    fn bank_index(&self, position: usize) -> usize {
        self.assigned[position]
    }

    /// Retune the tuner to a position. Fails fast on an out-of-range
    /// position rather than remapping it anywhere.
    fn switch_to_channel(&mut self, position: usize) {
        assert!(
            position < self.assigned.len(),
            "receiver {}: channel position {position} out of range ({} assigned)",
            self.index,
            self.assigned.len()
        );
        self.active_index = position;
    }

    /// Advance the combined polling + scheduling loop by one tick.
    ///
    /// `polling_only` disables the schedule probe; `limited_polling`
    /// restricts the poll rotation to channels known to carry traffic.
    /// Returns the state the tick terminated in and whether a packet was
    /// received.
    pub fn step(
        &mut self,
        now: u64,
        bank: &mut ChannelBank,
        polling_only: bool,
        limited_polling: bool,
    ) -> (ReceiverState, bool) {
        // A schedule opportunity preempts the dwell; the chosen branch
        // below then runs in this same tick.
        if !polling_only && self.state == ReceiverState::Dwell {
            self.enter_schedule_if_due(now, bank);
        }

        match self.state {
            ReceiverState::Switch => {
                self.run_switch_tick(ReceiverState::Dwell);
                (self.state, false)
            }
            ReceiverState::SwitchToSchedule => {
                self.run_switch_tick(ReceiverState::Schedule);
                (self.state, false)
            }
            ReceiverState::Schedule => self.run_schedule_tick(now, bank, false),
            ReceiverState::Dwell => self.run_dwell_tick(now, bank, limited_polling),
        }
    }

    /// Advance the pure-schedule loop by one tick. `Dwell` is plain idling
    /// here: nothing is listened to between scheduled catches, and a catch
    /// returns to idle without retuning back to a poll channel.
    pub fn step_schedule_only(&mut self, now: u64, bank: &mut ChannelBank) -> (ReceiverState, bool) {
        match self.state {
            ReceiverState::Dwell => {
                self.enter_schedule_if_due(now, bank);
                (self.state, false)
            }
            ReceiverState::SwitchToSchedule => {
                self.run_switch_tick(ReceiverState::Schedule);
                (self.state, false)
            }
            ReceiverState::Schedule => self.run_schedule_tick(now, bank, true),
            // Unreachable in this mode; kept for exhaustiveness.
            ReceiverState::Switch => (self.state, false),
        }
    }

    /// Record a packet against its sender's profile. Returns 0 on a first
    /// sighting, the updated observation count otherwise.
    pub fn observe_packet(&mut self, packet: &Packet, now: u64) -> u64 {
        {
            let mut known = self.known_channels.borrow_mut();
            if !known.contains(&self.poll_index) {
                known.push(self.poll_index);
            }
        }
        match self.profiles.borrow_mut().entry(packet.sender_id) {
            Entry::Vacant(slot) => {
                slot.insert(SenderProfile::new(packet.sender_id, self.poll_index, now));
                0
            }
            Entry::Occupied(mut slot) => slot.get_mut().record_observation(now),
        }
    }

    /// Scan the profiles for an arrival predicted within the schedule
    /// window and transition towards it when one exists. Profiles silent
    /// for over an hour are dropped along the way.
    fn enter_schedule_if_due(&mut self, now: u64, bank: &mut ChannelBank) {
        let mut best_gap = i64::MAX;
        let mut target: Option<usize> = None;
        let mut stale: Vec<u32> = Vec::new();
        {
            let mut profiles = self.profiles.borrow_mut();
            for (&id, profile) in profiles.iter_mut() {
                if now.saturating_sub(profile.last_sent_ms()) > STALE_SENDER_MS {
                    debug!(
                        "receiver {}: dropping stale sender {id} (heard {} times, mode {:?}, avg {:?})",
                        self.index,
                        profile.send_times(),
                        profile.mode_interval(),
                        profile.average_interval()
                    );
                    stale.push(id);
                    continue;
                }
                let gap = profile.schedule_gap(now);
                if gap > 0 && gap < SCHEDULE_WINDOW_MS && gap < best_gap {
                    best_gap = gap;
                    target = Some(profile.channel_index());
                }
            }
            for id in &stale {
                profiles.remove(id);
            }
        }

        if let Some(position) = target {
            if position != self.poll_index {
                bank.get_mut(self.bank_index(self.active_index)).quit_listen();
                self.state = ReceiverState::SwitchToSchedule;
                self.switch_to_channel(position);
            } else {
                // Already tuned there; no retune needed
                self.state = ReceiverState::Schedule;
            }
        }
    }

    /// One tick of a retune; transitions to `next_state` on the tick after
    /// the timer fills, so a retune occupies `switch_time + 1` ticks.
    fn run_switch_tick(&mut self, next_state: ReceiverState) {
        if self.switch_timer < self.switch_time {
            self.switch_timer += 1;
            if self.first_switch_loop {
                debug!("receiver {}: retuning", self.index);
                self.first_switch_loop = false;
            }
        } else {
            self.first_switch_loop = true;
            self.switch_timer = 0;
            self.state = next_state;
            debug!(
                "receiver {}: retune complete, active position {}",
                self.index, self.active_index
            );
        }
    }

    fn run_schedule_tick(
        &mut self,
        now: u64,
        bank: &mut ChannelBank,
        schedule_only: bool,
    ) -> (ReceiverState, bool) {
        let bank_idx = self.bank_index(self.active_index);
        bank.get_mut(bank_idx).listen();
        if self.schedule_timer < self.max_schedule_timeout {
            self.schedule_timer += 1;
            if let Some(packet) = bank.get_mut(bank_idx).pop() {
                // First success ends the schedule
                self.observe_packet(&packet, now);
                bank.get_mut(bank_idx).quit_listen();
                self.schedule_timer = 0;
                let terminal = self.state;
                self.state = self.after_schedule_state(schedule_only);
                debug!(
                    "receiver {}: scheduled catch of sender {} on position {}",
                    self.index, packet.sender_id, self.active_index
                );
                return (terminal, true);
            }
        } else {
            bank.get_mut(bank_idx).quit_listen();
            self.schedule_timer = 0;
            self.schedule_timeout_count += 1;
            self.state = self.after_schedule_state(schedule_only);
            debug!(
                "receiver {}: schedule timed out on position {}",
                self.index, self.active_index
            );
        }
        (self.state, false)
    }

    /// Where a finished schedule goes: back through `Switch` when the tuner
    /// strayed from the poll channel, straight to `Dwell` otherwise. The
    /// pure-schedule loop always idles in place.
    fn after_schedule_state(&self, schedule_only: bool) -> ReceiverState {
        if !schedule_only && self.poll_index != self.active_index {
            ReceiverState::Switch
        } else {
            ReceiverState::Dwell
        }
    }

    fn run_dwell_tick(
        &mut self,
        now: u64,
        bank: &mut ChannelBank,
        limited_polling: bool,
    ) -> (ReceiverState, bool) {
        self.active_index = self.poll_index;
        let bank_idx = self.bank_index(self.active_index);
        bank.get_mut(bank_idx).listen();
        if self.dwell_timer < self.expected_dwell_time {
            self.dwell_timer += 1;
            if let Some(packet) = bank.get_mut(bank_idx).pop() {
                // A first sighting yields no interval yet; restart the
                // dwell so the follow-up packet is caught on this channel.
                if self.observe_packet(&packet, now) == 0 {
                    self.dwell_timer = 0;
                }
                debug!(
                    "receiver {}: received packet from sender {} on position {}",
                    self.index, packet.sender_id, self.poll_index
                );
                return (self.state, true);
            }
        } else {
            bank.get_mut(bank_idx).quit_listen();
            self.dwell_timer = 0;
            self.advance_poll(limited_polling);
        }
        (self.state, false)
    }

    /// Pick the next poll position. Limited polling rotates backwards
    /// through the known-traffic positions (one position earlier, cyclic,
    /// which biases toward recently added channels); unlimited polling is
    /// a plain round-robin over the assigned slice.
    fn advance_poll(&mut self, limited: bool) {
        let next = if limited {
            let known = self.known_channels.borrow();
            if let Some(at) = known.iter().position(|&p| p == self.poll_index) {
                known[(at + known.len() - 1) % known.len()]
            } else {
                known.first().copied().unwrap_or(self.poll_index)
            }
        } else {
            (self.poll_index + 1) % self.assigned.len()
        };
        if next != self.active_index {
            self.state = ReceiverState::Switch;
        }
        self.poll_index = next;
        debug!(
            "receiver {}: dwell over, next poll position {}",
            self.index, self.poll_index
        );
    }

    #[cfg(test)]
    fn set_poll_index(&mut self, position: usize) {
        self.poll_index = position;
        self.active_index = position;
    }

    #[cfg(test)]
    fn known_channels(&self) -> Vec<usize> {
        self.known_channels.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whole_bank_receiver(num_channels: usize, switch: u64, dwell: u64) -> Receiver {
        Receiver::new(0, (0..num_channels).collect(), switch, dwell, None, None)
    }

    /// Step a polling-only receiver with the end-of-tick sweep applied,
    /// mirroring one simulator tick without senders.
    fn idle_tick(receiver: &mut Receiver, bank: &mut ChannelBank, now: u64) -> (ReceiverState, bool) {
        let out = receiver.step(now, bank, true, false);
        bank.sweep_unlistened();
        out
    }

    #[test]
    fn dwell_expiry_rotates_through_assigned_channels() {
        let mut bank = ChannelBank::new(3);
        let mut rx = whole_bank_receiver(3, 2, 4);

        // Dwell fills over 4 ticks, the 5th begins the rotation
        for now in 0..4 {
            assert_eq!(idle_tick(&mut rx, &mut bank, now), (ReceiverState::Dwell, false));
        }
        assert_eq!(idle_tick(&mut rx, &mut bank, 4).0, ReceiverState::Switch);
        assert_eq!(rx.poll_index(), 1);

        // Retune takes switch_time + 1 ticks, then dwelling resumes
        assert_eq!(idle_tick(&mut rx, &mut bank, 5).0, ReceiverState::Switch);
        assert_eq!(idle_tick(&mut rx, &mut bank, 6).0, ReceiverState::Switch);
        assert_eq!(idle_tick(&mut rx, &mut bank, 7).0, ReceiverState::Dwell);
        // The tuner follows the poll channel on the next dwell tick
        assert_eq!(idle_tick(&mut rx, &mut bank, 8).0, ReceiverState::Dwell);
        assert_eq!(rx.active_index(), rx.poll_index());
    }

    #[test]
    fn single_channel_poll_advance_stays_put() {
        let mut bank = ChannelBank::new(1);
        let mut rx = whole_bank_receiver(1, 5, 3);

        for now in 0..50 {
            let (state, _) = idle_tick(&mut rx, &mut bank, now);
            assert_eq!(state, ReceiverState::Dwell);
            assert_eq!(rx.poll_index(), 0);
        }
    }

    #[test]
    fn first_sighting_restarts_the_dwell() {
        let mut bank = ChannelBank::new(2);
        let mut rx = whole_bank_receiver(2, 2, 5);

        // Three idle ticks eat most of the dwell
        for now in 0..3 {
            idle_tick(&mut rx, &mut bank, now);
        }
        bank.get_mut(0).append(Packet::new(9));
        let (state, received) = rx.step(3, &mut bank, true, false);
        assert_eq!((state, received), (ReceiverState::Dwell, true));
        bank.sweep_unlistened();

        // The timer restarted: five more idle ticks before any rotation
        for now in 4..9 {
            assert_eq!(idle_tick(&mut rx, &mut bank, now).0, ReceiverState::Dwell);
        }
        assert_eq!(idle_tick(&mut rx, &mut bank, 9).0, ReceiverState::Switch);
    }

    #[test]
    fn second_sighting_does_not_restart_the_dwell() {
        let mut bank = ChannelBank::new(2);
        let mut rx = whole_bank_receiver(2, 2, 5);

        bank.get_mut(0).append(Packet::new(9));
        rx.step(0, &mut bank, true, false);
        bank.sweep_unlistened();
        bank.get_mut(0).append(Packet::new(9));
        let (_, received) = rx.step(1, &mut bank, true, false);
        assert!(received);
        assert_eq!(rx.profiles().get(&9).unwrap().send_times(), 2);

        // Dwell restarted only by the first catch: expiry after 5 more ticks
        for now in 2..6 {
            assert_eq!(idle_tick(&mut rx, &mut bank, now).0, ReceiverState::Dwell);
        }
        assert_eq!(idle_tick(&mut rx, &mut bank, 6).0, ReceiverState::Switch);
    }

    #[test]
    fn observe_packet_records_known_channel_and_profile() {
        let mut rx = whole_bank_receiver(4, 2, 5);

        rx.set_poll_index(2);
        assert_eq!(rx.observe_packet(&Packet::new(5), 100), 0);
        assert_eq!(rx.known_channels(), vec![2]);
        let next = {
            let profiles = rx.profiles();
            let profile = profiles.get(&5).unwrap();
            assert_eq!(profile.channel_index(), 2);
            assert_eq!(profile.send_times(), 1);
            profile.next_send_ms()
        };
        assert_eq!(next, -1);

        assert_eq!(rx.observe_packet(&Packet::new(5), 300), 2);
        let profiles = rx.profiles();
        let profile = profiles.get(&5).unwrap();
        assert_eq!(profile.min_interval_ms(), 200);
        // Roll-forward law: at least a second out
        assert!(profile.next_send_ms() - 300 >= 1000);
    }

    #[test]
    fn schedule_probe_detours_and_catches_at_predicted_time() {
        let mut bank = ChannelBank::new(8);
        let mut rx = whole_bank_receiver(8, 5, 220);

        // Teach the receiver a 1001 ms cadence on position 3
        rx.set_poll_index(3);
        rx.observe_packet(&Packet::new(4), 0);
        rx.observe_packet(&Packet::new(4), 1001);
        rx.set_poll_index(0);

        // Next arrival predicted at 2002; probe window opens at 1983
        let mut detour_tick = None;
        for now in 1002..2002 {
            let (state, _) = rx.step(now, &mut bank, false, false);
            bank.sweep_unlistened();
            if state == ReceiverState::SwitchToSchedule && detour_tick.is_none() {
                detour_tick = Some(now);
            }
        }
        let detour = detour_tick.expect("probe never fired");
        assert!(2002 - detour < 20, "detour at {detour}, predicted 2002");
        assert_eq!(rx.state(), ReceiverState::Schedule);
        assert_eq!(rx.active_index(), 3);

        // The packet lands on time and is caught in SCHEDULE
        bank.get_mut(3).append(Packet::new(4));
        let (state, received) = rx.step(2002, &mut bank, false, false);
        assert_eq!((state, received), (ReceiverState::Schedule, true));
        // Tuner strayed from the poll channel, so a retune follows
        assert_eq!(rx.state(), ReceiverState::Switch);
        assert_eq!(rx.profiles().get(&4).unwrap().send_times(), 3);
    }

    #[test]
    fn schedule_timeout_counts_and_returns_to_polling() {
        let mut bank = ChannelBank::new(4);
        let mut rx = whole_bank_receiver(4, 2, 10);

        rx.set_poll_index(2);
        rx.observe_packet(&Packet::new(1), 0);
        rx.observe_packet(&Packet::new(1), 1001);
        rx.set_poll_index(0);

        // Walk into the schedule window, then let it starve
        let mut now = 1002;
        while rx.state() != ReceiverState::Schedule {
            rx.step(now, &mut bank, false, false);
            bank.sweep_unlistened();
            now += 1;
            assert!(now < 3000, "schedule never started");
        }
        let timeouts_before = rx.schedule_timeout_count();
        for _ in 0..=10 {
            rx.step(now, &mut bank, false, false);
            bank.sweep_unlistened();
            now += 1;
        }
        assert_eq!(rx.schedule_timeout_count(), timeouts_before + 1);
        assert_ne!(rx.state(), ReceiverState::Schedule);
    }

    #[test]
    fn stale_sender_is_evicted_once_and_not_recreated() {
        let mut bank = ChannelBank::new(4);
        let mut rx = whole_bank_receiver(4, 2, 10);

        rx.set_poll_index(1);
        rx.observe_packet(&Packet::new(6), 0);
        rx.observe_packet(&Packet::new(6), 500);
        rx.set_poll_index(0);
        assert_eq!(rx.profiles().len(), 1);

        // Probe at a tick one hour past the last observation
        rx.step(500 + STALE_SENDER_MS + 1, &mut bank, false, false);
        assert_eq!(rx.profiles().len(), 0);

        // Nothing left to evict or schedule afterwards
        rx.step(500 + STALE_SENDER_MS + 2, &mut bank, false, false);
        assert_eq!(rx.profiles().len(), 0);
        assert_eq!(rx.state(), ReceiverState::Dwell);
    }

    #[test]
    fn limited_polling_walks_known_channels_backwards() {
        let mut rx = whole_bank_receiver(10, 2, 5);

        // Known positions in insertion order: 2, 5, 7
        for position in [2, 5, 7] {
            rx.set_poll_index(position);
            rx.observe_packet(&Packet::new(position as u32), 0);
        }
        assert_eq!(rx.known_channels(), vec![2, 5, 7]);

        rx.set_poll_index(5);
        rx.advance_poll(true);
        assert_eq!(rx.poll_index(), 2);

        rx.set_poll_index(2);
        rx.advance_poll(true);
        assert_eq!(rx.poll_index(), 7);

        // Off-list position jumps to the first known channel
        rx.set_poll_index(9);
        rx.advance_poll(true);
        assert_eq!(rx.poll_index(), 2);
    }

    #[test]
    fn limited_polling_with_no_known_channels_stays_put() {
        let mut rx = whole_bank_receiver(10, 2, 5);
        rx.set_poll_index(4);
        rx.advance_poll(true);
        assert_eq!(rx.poll_index(), 4);
        assert_eq!(rx.state(), ReceiverState::Dwell);
    }

    #[test]
    fn pure_schedule_idles_and_catches_without_retuning_back() {
        let mut bank = ChannelBank::new(8);
        let shared: SharedProfiles = Rc::new(RefCell::new(HashMap::new()));

        // A polling receiver fills the shared map
        let mut poller = Receiver::new(0, (0..8).collect(), 5, 220, Some(shared.clone()), None);
        poller.set_poll_index(3);
        poller.observe_packet(&Packet::new(2), 0);
        poller.observe_packet(&Packet::new(2), 1001);

        let mut scheduler = Receiver::new(1, (0..8).collect(), 5, 220, Some(shared), None);

        // Idle until the shared prediction pulls the scheduler in
        let mut now = 1002;
        while scheduler.state() != ReceiverState::Schedule {
            let (state, received) = scheduler.step_schedule_only(now, &mut bank);
            assert!(!received);
            assert_ne!(state, ReceiverState::Switch);
            bank.sweep_unlistened();
            now += 1;
            assert!(now < 3000, "scheduler never engaged");
        }
        assert_eq!(scheduler.active_index(), 3);

        let timeouts = scheduler.schedule_timeout_count();
        bank.get_mut(3).append(Packet::new(2));
        let (state, received) = scheduler.step_schedule_only(now, &mut bank);
        assert_eq!((state, received), (ReceiverState::Schedule, true));
        // Straight back to idle; a success is not a timeout
        assert_eq!(scheduler.state(), ReceiverState::Dwell);
        assert_eq!(scheduler.schedule_timeout_count(), timeouts);
    }

    #[test]
    #[should_panic]
    fn out_of_range_schedule_target_fails_fast() {
        let mut rx = whole_bank_receiver(2, 2, 5);
        rx.switch_to_channel(2);
    }
}
