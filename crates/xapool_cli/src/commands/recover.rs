//! Recover command implementation.
//!
//! Plays out a coordinator crash between the two commit phases: a first
//! provider prepares branches and is snapshotted, then dropped without
//! finalizing anything. A second provider is restored from the snapshot,
//! reattached to the resource manager and resolves whatever `recover`
//! reports as in doubt.

use super::CLI_FORMAT_ID;
use serde::Serialize;
use tracing::info;
use xapool_core::{InMemoryFacadeFactory, PoolingXaProvider, StatsSnapshot};
use xapool_facade::{InMemoryResourceManager, XaConfig, Xid};

/// Outcome of a crash-and-recover run.
#[derive(Debug, Serialize)]
pub struct RecoveryReport {
    /// Size of the provider snapshot, in bytes.
    pub snapshot_bytes: usize,
    /// Branches reported in doubt after the restart.
    pub in_doubt: Vec<String>,
    /// How in-doubt branches were resolved (commit, rollback).
    pub resolution: String,
    /// Prepared branches still left in the resource manager.
    pub remaining_prepared: usize,
    /// Counters of the restored provider.
    pub stats: StatsSnapshot,
}

/// Runs the recover command.
pub fn run(prepared: u32, commit: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = crash_and_recover(prepared, commit)?;

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

/// Prepares `prepared` branches, restarts and resolves them.
pub fn crash_and_recover(
    prepared: u32,
    commit: bool,
) -> Result<RecoveryReport, Box<dyn std::error::Error>> {
    let manager = InMemoryResourceManager::new();

    let snapshot = {
        let mut provider =
            PoolingXaProvider::in_memory(XaConfig::new("recovery"), manager.clone());
        provider.open()?;
        for i in 0..prepared {
            let xid = Xid::generate(CLI_FORMAT_ID, i);
            provider.start(&xid)?;
            provider.end_and_prepare(&xid)?;
        }
        serde_json::to_string(&provider)?
        // Dropped here without commit or close
    };
    info!(bytes = snapshot.len(), "coordinator stopped with branches in doubt");

    let mut provider: PoolingXaProvider<InMemoryFacadeFactory> = serde_json::from_str(&snapshot)?;
    provider.factory_mut().attach(manager.clone());
    provider.open()?;

    let in_doubt = provider.recover()?;
    for xid in &in_doubt {
        if commit {
            provider.commit(xid, true)?;
        } else {
            provider.rollback(xid)?;
        }
    }

    let report = RecoveryReport {
        snapshot_bytes: snapshot.len(),
        in_doubt: in_doubt.iter().map(ToString::to_string).collect(),
        resolution: if commit { "commit" } else { "rollback" }.to_string(),
        remaining_prepared: manager.prepared().len(),
        stats: provider.stats(),
    };
    provider.close()?;

    info!(
        resolved = report.in_doubt.len(),
        resolution = %report.resolution,
        "recovery finished"
    );
    Ok(report)
}

fn print_text_output(report: &RecoveryReport) {
    println!("=== Recovery ===");
    println!("Snapshot size:       {} bytes", report.snapshot_bytes);
    println!("In doubt:            {}", report.in_doubt.len());
    for xid in &report.in_doubt {
        println!("  {xid}");
    }
    println!("Resolution:          {}", report.resolution);
    println!("Still prepared:      {}", report.remaining_prepared);
    println!("Facades created:     {}", report.stats.facades_created);
}
