//! Session fusion: merges one poll's scanner output into canonical sessions.
//!
//! Precedence, in order:
//!
//! 1. Descriptor files seed the map. They carry the best project attribution.
//! 2. Processes enrich the entry with the same key (pid, terminal, elapsed,
//!    cpu), or insert under their own key.
//! 3. Remote connections are inserted last under their own namespace and
//!    never merge into a local entry.
//!
//! The result is a pure function of the inputs: same scanner output, same map.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::scanners::{DescriptorObservation, ProcessObservation, RemoteObservation, ScanBatch};

/// Dedup key of a fused session.
///
/// Variants are distinct namespaces: a remote host can never collide with a
/// local directory or descriptor id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DedupKey {
    Directory(String),
    Descriptor(String),
    Process(u32),
    Remote(String),
}

impl DedupKey {
    /// Session id a new session under this key starts from.
    pub fn base_id(&self) -> String {
        match self {
            DedupKey::Directory(path) => path.clone(),
            DedupKey::Descriptor(id) => id.clone(),
            DedupKey::Process(pid) => format!("pid-{}", pid),
            DedupKey::Remote(host) => format!("remote-{}", host),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_id())
    }
}

/// One canonical session as seen in a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedObservation {
    pub key: DedupKey,
    /// Identifier of the observation that created the entry.
    pub source_id: String,
    pub working_directory: Option<String>,
    pub project_name: String,
    pub process_id: Option<u32>,
    pub terminal: Option<String>,
    pub elapsed_ms: Option<u64>,
    pub cumulative_cpu_seconds: Option<f64>,
    pub descriptor_modified: Option<DateTime<Utc>>,
    pub is_remote: bool,
}

impl FusedObservation {
    fn from_descriptor(key: DedupKey, descriptor: &DescriptorObservation) -> Self {
        Self {
            project_name: descriptor
                .project_name
                .clone()
                .unwrap_or_else(|| descriptor.session_id.clone()),
            key,
            source_id: descriptor.session_id.clone(),
            working_directory: descriptor.working_directory.clone(),
            process_id: None,
            terminal: None,
            elapsed_ms: None,
            cumulative_cpu_seconds: None,
            descriptor_modified: Some(descriptor.last_modified),
            is_remote: false,
        }
    }

    fn from_process(key: DedupKey, process: &ProcessObservation) -> Self {
        let source_id = DedupKey::Process(process.process_id).base_id();
        Self {
            project_name: process
                .project_name
                .clone()
                .unwrap_or_else(|| source_id.clone()),
            key,
            source_id,
            working_directory: process.working_directory.clone(),
            process_id: Some(process.process_id),
            terminal: process.terminal.clone(),
            elapsed_ms: Some(process.elapsed_ms),
            cumulative_cpu_seconds: Some(process.cumulative_cpu_seconds),
            descriptor_modified: None,
            is_remote: false,
        }
    }

    fn from_remote(key: DedupKey, remote: &RemoteObservation) -> Self {
        Self {
            source_id: key.base_id(),
            key,
            working_directory: None,
            project_name: remote.project_name(),
            process_id: None,
            terminal: None,
            elapsed_ms: Some(remote.elapsed_ms),
            cumulative_cpu_seconds: None,
            descriptor_modified: None,
            is_remote: true,
        }
    }

    /// Process fields are authoritative from the process scanner.
    fn absorb_process(&mut self, process: &ProcessObservation) {
        self.process_id = Some(process.process_id);
        self.terminal = process.terminal.clone();
        self.elapsed_ms = Some(process.elapsed_ms);
        self.cumulative_cpu_seconds = Some(process.cumulative_cpu_seconds);
        if self.working_directory.is_none() {
            self.working_directory = process.working_directory.clone();
            if let Some(name) = &process.project_name {
                self.project_name = name.clone();
            }
        }
    }

    pub fn has_process(&self) -> bool {
        self.process_id.is_some()
    }
}

pub fn descriptor_key(descriptor: &DescriptorObservation) -> DedupKey {
    match &descriptor.working_directory {
        Some(path) => DedupKey::Directory(path.clone()),
        None => DedupKey::Descriptor(descriptor.session_id.clone()),
    }
}

pub fn process_key(process: &ProcessObservation) -> DedupKey {
    match &process.working_directory {
        Some(path) => DedupKey::Directory(path.clone()),
        None => DedupKey::Process(process.process_id),
    }
}

pub fn remote_key(remote: &RemoteObservation) -> DedupKey {
    DedupKey::Remote(remote.host.clone())
}

pub fn fuse_batch(batch: &ScanBatch) -> BTreeMap<DedupKey, FusedObservation> {
    fuse(&batch.descriptors, &batch.processes, &batch.remotes)
}

/// Merges the three scanner lists into one map of canonical sessions.
pub fn fuse(
    descriptors: &[DescriptorObservation],
    processes: &[ProcessObservation],
    remotes: &[RemoteObservation],
) -> BTreeMap<DedupKey, FusedObservation> {
    let mut fused: BTreeMap<DedupKey, FusedObservation> = BTreeMap::new();

    for descriptor in descriptors {
        let key = descriptor_key(descriptor);
        match fused.get(&key) {
            Some(existing) if !descriptor_wins(descriptor, existing) => {}
            _ => {
                fused.insert(key.clone(), FusedObservation::from_descriptor(key, descriptor));
            }
        }
    }

    for process in processes {
        let key = process_key(process);
        match fused.get_mut(&key) {
            Some(existing) if existing.has_process() => {
                if process_wins(process, existing) {
                    tracing::debug!(
                        key = %key,
                        kept = process.process_id,
                        dropped = ?existing.process_id,
                        "Duplicate process for session key"
                    );
                    existing.absorb_process(process);
                }
            }
            Some(existing) => existing.absorb_process(process),
            None => {
                fused.insert(key.clone(), FusedObservation::from_process(key, process));
            }
        }
    }

    let mut winners: BTreeMap<DedupKey, &RemoteObservation> = BTreeMap::new();
    for remote in remotes {
        let key = remote_key(remote);
        match winners.get(&key) {
            Some(existing)
                if !longer_lived(
                    remote.elapsed_ms,
                    remote.process_id,
                    existing.elapsed_ms,
                    existing.process_id,
                ) => {}
            _ => {
                winners.insert(key, remote);
            }
        }
    }
    for (key, remote) in winners {
        fused.insert(key.clone(), FusedObservation::from_remote(key, remote));
    }

    fused
}

// Newest mtime wins; ties break on the smaller id so input order never matters.
fn descriptor_wins(candidate: &DescriptorObservation, existing: &FusedObservation) -> bool {
    match existing.descriptor_modified {
        Some(modified) if candidate.last_modified != modified => candidate.last_modified > modified,
        _ => candidate.session_id < existing.source_id,
    }
}

fn process_wins(candidate: &ProcessObservation, existing: &FusedObservation) -> bool {
    match (existing.elapsed_ms, existing.process_id) {
        (Some(elapsed_ms), Some(pid)) => {
            longer_lived(candidate.elapsed_ms, candidate.process_id, elapsed_ms, pid)
        }
        _ => true,
    }
}

/// Longest elapsed time wins; ties go to the lowest pid.
fn longer_lived(elapsed_ms: u64, pid: u32, other_elapsed_ms: u64, other_pid: u32) -> bool {
    elapsed_ms > other_elapsed_ms || (elapsed_ms == other_elapsed_ms && pid < other_pid)
}
