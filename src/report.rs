//! Run reporting: console summary, per-sender table, trace export, and the
//! batch CSV.
//!
//! Formatting lives here so the simulation core stays free of I/O. The
//! shapes are fixed contracts: the summary totals, the markdown sender
//! table, the per-receiver `(state_code, received)` trace files, and the
//! `num_senders,total,received,lost,lost_rate_percent` CSV rows.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::simulation::{Simulator, TraceSample};

/// Percentage of `part` in `total`, 0 when nothing was counted.
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Print the aggregate totals and the per-channel breakdown.
pub fn print_summary(sim: &Simulator) {
    let (_, received, lost) = sim.bank().totals();
    let total = received + lost;

    println!("\nSimulation result ({}):", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"));
    println!("    Total packets: {total}");
    println!("    Received     : {received}");
    println!("    Lost         : {lost}");
    println!("    Lost rate    : {:.2}%", percent(lost, total));

    println!("\nPer-channel details:");
    for (index, channel) in sim.bank().iter().enumerate() {
        let ch_total = channel.received() + channel.lost();
        println!(
            "  Channel {index}: total={ch_total}, received={}, lost={}, lost rate={:.2}%",
            channel.received(),
            channel.lost(),
            percent(channel.lost(), ch_total)
        );
    }
}

/// Write the markdown table of every profile every receiver holds.
///
/// Columns: id, last_sent_ms, send_times, last_interval, next_send_ms,
/// channel_index (the bank index, mapped through the receiver's assigned
/// slice). An empty interval history renders as `-1`.
pub fn write_sender_table(sim: &Simulator, path: &Path) -> Result<()> {
    let mut out = String::new();
    out.push_str("| id | last_sent_ms | send_times | last_interval | next_send_ms | channel_index |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for receiver in sim.receivers() {
        for profile in receiver.profiles().values() {
            let last_interval = profile
                .last_interval()
                .map_or(-1i64, |interval| interval as i64);
            let bank_index = receiver.assigned_channels()[profile.channel_index()];
            out.push_str(&format!(
                "| S{} | {} | {} | {} | {} | {} |\n",
                profile.id(),
                profile.last_sent_ms(),
                profile.send_times(),
                last_interval,
                profile.next_send_ms(),
                bank_index
            ));
        }
    }
    fs::write(path, out)
        .with_context(|| format!("failed to write sender table {}", path.display()))
}

#[derive(Serialize)]
struct TraceFile<'a> {
    receiver: usize,
    samples: &'a [TraceSample],
}

/// Write one JSON trace file per receiver into `dir`, for plot rendering.
pub fn write_traces(sim: &Simulator, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    for (receiver, samples) in sim.traces().iter().enumerate() {
        let path = dir.join(format!("receiver-{receiver}-trace.json"));
        let file = File::create(&path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        serde_json::to_writer(file, &TraceFile { receiver, samples })
            .with_context(|| format!("failed to write trace file {}", path.display()))?;
    }
    Ok(())
}

/// Append one result row for a finished run; the header is written when the
/// file is created.
pub fn append_batch_csv(sim: &Simulator, path: &Path) -> Result<()> {
    let (_, received, lost) = sim.bank().totals();
    let total = received + lost;

    let exists = path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open result file {}", path.display()))?;
    if !exists {
        writeln!(file, "num_senders,total,received,lost,lost_rate_percent")
            .with_context(|| format!("failed to write header to {}", path.display()))?;
    }
    writeln!(
        file,
        "{},{total},{received},{lost},{:.2}",
        sim.scenario().num_senders,
        percent(lost, total)
    )
    .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{CoexistenceMode, Scenario};

    fn small_run() -> Simulator {
        let mut sim = Simulator::new(Scenario {
            mode: CoexistenceMode::AllPolling,
            num_channels: 4,
            num_receivers: 2,
            num_senders: 2,
            seed: Some(2),
            ..Scenario::default()
        });
        sim.run(2_000);
        sim
    }

    #[test]
    fn sender_table_has_one_row_per_profile() {
        let sim = small_run();
        let dir = std::env::temp_dir().join("channel-scan-sim-table-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sender_info.md");

        write_sender_table(&sim, &path).unwrap();
        let table = fs::read_to_string(&path).unwrap();
        let profile_rows: usize = sim
            .receivers()
            .iter()
            .map(|receiver| receiver.profiles().len())
            .sum();
        // Header, separator, one line per profile
        assert_eq!(table.lines().count(), 2 + profile_rows);
        assert!(table.starts_with("| id |"));
    }

    #[test]
    fn traces_serialize_one_file_per_receiver() {
        let sim = small_run();
        let dir = std::env::temp_dir().join("channel-scan-sim-trace-test");
        let _ = fs::remove_dir_all(&dir);

        write_traces(&sim, &dir).unwrap();
        let data = fs::read_to_string(dir.join("receiver-0-trace.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed["receiver"], 0);
        assert_eq!(parsed["samples"].as_array().unwrap().len(), 2_000);
        assert!(dir.join("receiver-1-trace.json").exists());
    }

    #[test]
    fn batch_csv_appends_rows_under_a_single_header() {
        let sim = small_run();
        let dir = std::env::temp_dir().join("channel-scan-sim-csv-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sim_result.csv");
        let _ = fs::remove_file(&path);

        append_batch_csv(&sim, &path).unwrap();
        append_batch_csv(&sim, &path).unwrap();

        let csv = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "num_senders,total,received,lost,lost_rate_percent");
        assert!(lines[1].starts_with("2,"));
        assert_eq!(lines[1], lines[2]);
    }

    #[test]
    fn percent_of_nothing_is_zero() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
