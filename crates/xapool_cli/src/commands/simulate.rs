//! Simulate command implementation.

use super::CLI_FORMAT_ID;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};
use xapool_core::{PoolingXaProvider, StatsSnapshot};
use xapool_facade::{InMemoryResourceManager, XaConfig, Xid};

/// Outcome of a simulated workload.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Branches started.
    pub branches: u32,
    /// Branches committed.
    pub committed: u32,
    /// Branches aborted with fail-and-rollback.
    pub rolled_back: u32,
    /// Physical connections the resource manager saw.
    pub connections_opened: u64,
    /// Idle facades left when the workload finished.
    pub idle_facades: usize,
    /// Provider counters.
    pub stats: StatsSnapshot,
}

/// Runs the simulate command.
pub fn run(
    branches: u32,
    in_flight: usize,
    fail_every: Option<u32>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(branches, in_flight, fail_every)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Runs `branches` branches, keeping up to `in_flight` prepared at once.
pub fn simulate(
    branches: u32,
    in_flight: usize,
    fail_every: Option<u32>,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let manager = InMemoryResourceManager::new();
    let mut provider = PoolingXaProvider::in_memory(XaConfig::new("simulation"), manager.clone());
    provider.open()?;

    let mut pending: VecDeque<Xid> = VecDeque::new();
    let mut committed = 0;
    let mut rolled_back = 0;

    for i in 0..branches {
        let xid = Xid::generate(CLI_FORMAT_ID, i);
        provider.start(&xid)?;
        provider.get_or_establish_connection()?;

        if fail_every.is_some_and(|n| n > 0 && (i + 1) % n == 0) {
            debug!(%xid, "simulated application failure");
            provider.fail_and_rollback(&xid)?;
            rolled_back += 1;
            continue;
        }

        provider.end_and_prepare(&xid)?;
        pending.push_back(xid);

        while pending.len() > in_flight {
            if let Some(oldest) = pending.pop_front() {
                provider.commit(&oldest, false)?;
                committed += 1;
            }
        }
    }

    while let Some(xid) = pending.pop_front() {
        provider.commit(&xid, false)?;
        committed += 1;
    }

    let report = SimulationReport {
        branches,
        committed,
        rolled_back,
        connections_opened: manager.connections_opened(),
        idle_facades: provider.idle_count(),
        stats: provider.stats(),
    };
    provider.close()?;

    info!(
        branches,
        connections = report.connections_opened,
        "simulation finished"
    );
    Ok(report)
}

fn print_text_output(report: &SimulationReport) {
    println!("=== Simulation ===");
    println!("Branches:            {}", report.branches);
    println!("Committed:           {}", report.committed);
    println!("Rolled back:         {}", report.rolled_back);
    println!("Connections opened:  {}", report.connections_opened);
    println!("Idle at end:         {}", report.idle_facades);
    println!();
    println!("=== Pool ===");
    println!("Facades created:     {}", report.stats.facades_created);
    println!("Branches prepared:   {}", report.stats.branches_prepared);
    println!("Transient failures:  {}", report.stats.transient_failures);
}
