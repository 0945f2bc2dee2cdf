//! Timestep driver composing senders, receivers, and the channel bank.
//!
//! One logical clock in milliseconds advances by exactly one unit per
//! iteration. Ordering within a tick is fixed: senders emit, receivers step
//! in index order, unlistened channels shed their backlog, the clock
//! increments. Nothing blocks and nothing touches the wall clock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scenario::{CoexistenceMode, Scenario};

use super::channel::ChannelBank;
use super::receiver::{Receiver, SharedKnownChannels, SharedProfiles};
use super::sender::Sender;
use super::types::TraceSample;

/// One simulation run: a channel bank, a sender population, a receiver
/// fleet wired up per the coexistence mode, and per-receiver state traces.
pub struct Simulator {
    scenario: Scenario,
    cur_timestep: u64,
    bank: ChannelBank,
    senders: Vec<Sender>,
    receivers: Vec<Receiver>,
    traces: Vec<Vec<TraceSample>>,
    rng: StdRng,
}

impl Simulator {
    pub fn new(scenario: Scenario) -> Self {
        let mut rng = match scenario.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let bank = ChannelBank::new(scenario.num_channels);

        // Shared maps exist regardless of mode; only the sharing modes hand
        // the same map to both receivers.
        let shared_profiles: SharedProfiles = Rc::new(RefCell::new(HashMap::new()));
        let shared_known: SharedKnownChannels = Rc::new(RefCell::new(Vec::new()));

        let receivers = (0..scenario.num_receivers)
            .map(|index| {
                let assigned: Vec<usize> = match scenario.mode {
                    CoexistenceMode::PartitionedPollingAndScheduling => {
                        let per_receiver = scenario.num_channels / scenario.num_receivers;
                        (index * per_receiver..(index + 1) * per_receiver).collect()
                    }
                    _ => (0..scenario.num_channels).collect(),
                };
                let profiles = (scenario.mode == CoexistenceMode::PollingFeedsScheduling)
                    .then(|| shared_profiles.clone());
                let known = (scenario.mode == CoexistenceMode::PollingFeedsLimitedPolling)
                    .then(|| shared_known.clone());
                Receiver::new(
                    index,
                    assigned,
                    scenario.switch_time_ms,
                    scenario.dwell_time_ms,
                    profiles,
                    known,
                )
            })
            .collect();

        let senders = (0..scenario.num_senders)
            .map(|id| {
                let channel_index = rng.gen_range(0..scenario.num_channels);
                let offset = rng.gen_range(0..=scenario.max_initial_offset_ms);
                let mut sender =
                    Sender::new(id as u32, scenario.sender_interval_ms, offset, channel_index);
                if scenario.interval_jitter_stddev > 0.0 {
                    sender.set_jitter(scenario.interval_jitter_stddev);
                }
                sender
            })
            .collect();

        let traces = vec![Vec::new(); scenario.num_receivers];

        Self {
            scenario,
            cur_timestep: 0,
            bank,
            senders,
            receivers,
            traces,
            rng,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Current position of the logical clock in simulated milliseconds.
    pub fn current_timestep(&self) -> u64 {
        self.cur_timestep
    }

    pub fn bank(&self) -> &ChannelBank {
        &self.bank
    }

    pub fn receivers(&self) -> &[Receiver] {
        &self.receivers
    }

    pub fn senders(&self) -> &[Sender] {
        &self.senders
    }

    pub fn senders_mut(&mut self) -> &mut [Sender] {
        &mut self.senders
    }

    /// Per-receiver `(state, received)` sequences, one sample per tick.
    pub fn traces(&self) -> &[Vec<TraceSample>] {
        &self.traces
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        let now = self.cur_timestep;

        for sender in &mut self.senders {
            sender.tick(now, &mut self.bank, &mut self.rng);
        }

        for (index, receiver) in self.receivers.iter_mut().enumerate() {
            let (state, received) = match self.scenario.mode {
                CoexistenceMode::AllPolling => receiver.step(now, &mut self.bank, true, false),
                CoexistenceMode::PartitionedPollingAndScheduling => {
                    receiver.step(now, &mut self.bank, false, false)
                }
                CoexistenceMode::PollingFeedsScheduling => {
                    if index == 0 {
                        receiver.step(now, &mut self.bank, true, false)
                    } else {
                        receiver.step_schedule_only(now, &mut self.bank)
                    }
                }
                CoexistenceMode::PollingFeedsLimitedPolling => {
                    receiver.step(now, &mut self.bank, true, index == 1)
                }
            };
            self.traces[index].push(TraceSample::new(state, received));
        }

        self.bank.sweep_unlistened();
        self.cur_timestep += 1;
    }

    /// Run until the step limit, then close the loss books so every emitted
    /// packet is accounted as received or lost.
    pub fn run(&mut self, step_limit: u64) {
        info!(
            "simulation start: mode={:?}, channels={}, receivers={}, senders={}, steps={}",
            self.scenario.mode,
            self.scenario.num_channels,
            self.scenario.num_receivers,
            self.scenario.num_senders,
            step_limit
        );
        let progress_every = (step_limit / 10).max(1);
        while self.cur_timestep < step_limit {
            self.step();
            if self.cur_timestep % progress_every == 0 {
                debug!("simulated {} / {step_limit} ms", self.cur_timestep);
            }
        }
        self.bank.drain_all();
        let (sent, received, lost) = self.bank.totals();
        info!("simulation done: sent={sent}, received={received}, lost={lost}");
    }

    #[cfg(test)]
    fn replace_senders(&mut self, senders: Vec<Sender>) {
        self.senders = senders;
    }
}
