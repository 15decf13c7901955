//! Signal scanners.
//!
//! Each scanner is a pure function of OS state (read through an
//! [`OsInspector`](crate::inspector::OsInspector)) to a list of raw
//! observations. They share nothing and never fail: a missing source yields
//! an empty list.

pub mod descriptor;
pub mod process;
pub mod remote;

pub use descriptor::{scan_descriptors, DescriptorObservation};
pub use process::{scan_processes, ProcessObservation};
pub use remote::{parse_ssh_target, scan_remote_sessions, RemoteObservation, SshTarget};

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::inspector::OsInspector;

/// Raw scanner output for one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanBatch {
    pub descriptors: Vec<DescriptorObservation>,
    pub processes: Vec<ProcessObservation>,
    pub remotes: Vec<RemoteObservation>,
}

/// Runs all three scanners. The process table is listed once and shared by
/// the process and remote scanners.
pub fn scan_all<I: OsInspector + ?Sized>(
    inspector: &I,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> ScanBatch {
    let descriptors = scan_descriptors(inspector, &config.descriptors, now);
    let table = inspector.list_processes();
    let processes = scan_processes(inspector, &table, &config.process);
    let remotes = scan_remote_sessions(&table, &config.remote);

    tracing::debug!(
        descriptors = descriptors.len(),
        processes = processes.len(),
        remotes = remotes.len(),
        table_rows = table.len(),
        "Scan complete"
    );

    ScanBatch {
        descriptors,
        processes,
        remotes,
    }
}
