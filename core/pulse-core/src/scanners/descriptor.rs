use chrono::{DateTime, Utc};
use std::path::Path;

use crate::config::DescriptorScanConfig;
use crate::inspector::OsInspector;
use crate::patterns::{extract_working_directory, project_name_for};

/// A fresh session-descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorObservation {
    /// File name without its extension.
    pub session_id: String,
    pub working_directory: Option<String>,
    pub project_name: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub age_ms: u64,
}

/// Lists fresh descriptor files and extracts a working-directory hint from each.
///
/// Files older than the freshness threshold are treated as dead sessions and
/// skipped. Unreadable files are skipped individually.
pub fn scan_descriptors<I: OsInspector + ?Sized>(
    inspector: &I,
    config: &DescriptorScanConfig,
    now: DateTime<Utc>,
) -> Vec<DescriptorObservation> {
    let freshness_ms = config.freshness.as_millis() as u64;
    let mut observations = Vec::new();

    for entry in inspector.list_dir(&config.directory) {
        if entry.file_name.starts_with('.') {
            continue;
        }
        let Some(session_id) = session_id_for(&entry.file_name) else {
            continue;
        };

        // Clock skew can put mtimes slightly in the future.
        let age_ms = now
            .signed_duration_since(entry.modified)
            .num_milliseconds()
            .max(0) as u64;
        if age_ms > freshness_ms {
            tracing::trace!(session_id = %session_id, age_ms, "Descriptor stale");
            continue;
        }

        let Some(content) = inspector.read_prefix(&entry.path, config.max_prefix_bytes) else {
            tracing::debug!(path = %entry.path.display(), "Skipping unreadable descriptor");
            continue;
        };

        let working_directory = extract_working_directory(&content);
        let project_name = working_directory.as_deref().map(project_name_for);

        observations.push(DescriptorObservation {
            session_id,
            working_directory,
            project_name,
            last_modified: entry.modified,
            age_ms,
        });
    }

    observations.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    observations
}

fn session_id_for(file_name: &str) -> Option<String> {
    let stem = Path::new(file_name).file_stem()?.to_string_lossy().to_string();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}
