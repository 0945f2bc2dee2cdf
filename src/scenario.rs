//! Scenario configuration: defaults, TOML loading, validation.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::Deserialize;

/// How the receiver fleet divides the bank between polling and scheduling.
/// The names match the original experiment labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
pub enum CoexistenceMode {
    /// Every receiver polls the full bank; no scheduling anywhere.
    #[serde(rename = "r1-rn-polling")]
    #[value(name = "r1-rn-polling")]
    AllPolling,
    /// The bank splits into equal contiguous slices; each receiver polls
    /// and schedules over its own slice.
    #[serde(rename = "r1-rn-both-scheduling-and-polling")]
    #[value(name = "r1-rn-both-scheduling-and-polling")]
    PartitionedPollingAndScheduling,
    /// Receiver 0 polls the full bank and fills a shared profile map;
    /// receiver 1 runs pure scheduling against that map.
    #[serde(rename = "r1-polling-r2-scheduling")]
    #[value(name = "r1-polling-r2-scheduling")]
    PollingFeedsScheduling,
    /// Receiver 0 polls the full bank; receiver 1 polls only the channels
    /// known to carry traffic (shared known-channel list).
    #[serde(rename = "r1-polling-r2-limited-polling")]
    #[value(name = "r1-polling-r2-limited-polling")]
    PollingFeedsLimitedPolling,
}

/// One run's worth of configuration. Every field has a default; a TOML
/// scenario file and CLI flags override selectively.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Scenario {
    pub mode: CoexistenceMode,
    pub num_channels: usize,
    pub num_receivers: usize,
    pub num_senders: usize,
    /// Ticks a tuner needs to retune.
    pub switch_time_ms: u64,
    /// Maximum ticks per poll-channel visit; also the schedule timeout.
    pub dwell_time_ms: u64,
    pub sender_interval_ms: u64,
    /// Sender start offsets are drawn uniformly from `0..=this`.
    pub max_initial_offset_ms: u64,
    /// Gaussian perturbation of each emission interval; 0 disables it.
    pub interval_jitter_stddev: f64,
    /// Pin for reproducible runs; unset draws from entropy.
    pub seed: Option<u64>,
    /// Simulated milliseconds per run.
    pub step_limit: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            mode: CoexistenceMode::PartitionedPollingAndScheduling,
            num_channels: 40,
            num_receivers: 2,
            num_senders: 15,
            switch_time_ms: 5,
            dwell_time_ms: 220,
            sender_interval_ms: 200,
            max_initial_offset_ms: 200,
            interval_jitter_stddev: 0.0,
            seed: None,
            step_limit: 30 * 60 * 1000,
        }
    }
}

impl Scenario {
    /// Load and validate a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = toml::from_str(&content)
            .with_context(|| format!("failed to parse scenario file {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject configurations the simulator cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            bail!("num-channels must be positive");
        }
        if self.num_receivers == 0 {
            bail!("num-receivers must be positive");
        }
        if self.num_senders == 0 {
            bail!("num-senders must be positive");
        }
        if self.num_receivers > self.num_channels {
            bail!(
                "num-receivers ({}) exceeds num-channels ({})",
                self.num_receivers,
                self.num_channels
            );
        }
        if self.switch_time_ms == 0 {
            bail!("switch-time-ms must be positive");
        }
        if self.dwell_time_ms == 0 {
            bail!("dwell-time-ms must be positive");
        }
        if self.sender_interval_ms == 0 {
            bail!("sender-interval-ms must be positive");
        }
        if !(self.interval_jitter_stddev >= 0.0 && self.interval_jitter_stddev.is_finite()) {
            bail!(
                "interval-jitter-stddev must be finite and non-negative, got {}",
                self.interval_jitter_stddev
            );
        }
        match self.mode {
            CoexistenceMode::PartitionedPollingAndScheduling => {
                if self.num_channels / self.num_receivers == 0 {
                    bail!(
                        "partitioned mode cannot split {} channels into {} nonempty slices",
                        self.num_channels,
                        self.num_receivers
                    );
                }
            }
            CoexistenceMode::PollingFeedsScheduling | CoexistenceMode::PollingFeedsLimitedPolling => {
                if self.num_receivers != 2 {
                    bail!(
                        "mode {:?} pairs exactly two receivers, got {}",
                        self.mode,
                        self.num_receivers
                    );
                }
            }
            CoexistenceMode::AllPolling => {}
        }
        Ok(())
    }
}
