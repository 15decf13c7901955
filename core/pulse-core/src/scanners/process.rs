use crate::config::ProcessScanConfig;
use crate::duration::{parse_ps_time, parse_ps_time_ms};
use crate::inspector::{OsInspector, ProcessRow};
use crate::patterns::project_name_for;

// Runtimes that launch the CLI as a script argument.
const SCRIPT_HOSTS: &[&str] = &["node", "bun", "deno"];

/// A running instance of the monitored executable.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessObservation {
    pub process_id: u32,
    pub terminal: Option<String>,
    pub elapsed_ms: u64,
    pub cumulative_cpu_seconds: f64,
    pub working_directory: Option<String>,
    pub project_name: Option<String>,
}

/// Selects rows running the monitored executable and resolves their cwd.
///
/// A row matches when its command name matches the executable pattern, or
/// when a script host (`node`, `bun`, `deno`) runs an argument that does,
/// unless the full command line matches an exclude
/// pattern. Rows whose time columns cannot be parsed are skipped.
pub fn scan_processes<I: OsInspector + ?Sized>(
    inspector: &I,
    table: &[ProcessRow],
    config: &ProcessScanConfig,
) -> Vec<ProcessObservation> {
    let mut observations: Vec<ProcessObservation> = table
        .iter()
        .filter(|row| is_monitored(row, config))
        .filter_map(|row| {
            let Some(elapsed_ms) = parse_ps_time_ms(&row.elapsed) else {
                tracing::debug!(pid = row.pid, elapsed = %row.elapsed, "Unparseable elapsed time");
                return None;
            };
            let Some(cumulative_cpu_seconds) = parse_ps_time(&row.cpu_time) else {
                tracing::debug!(pid = row.pid, cpu_time = %row.cpu_time, "Unparseable cpu time");
                return None;
            };

            let working_directory = inspector
                .process_cwd(row.pid)
                .map(|cwd| cwd.trim_end_matches('/').to_string())
                .filter(|cwd| cwd.starts_with('/'));
            let project_name = working_directory.as_deref().map(project_name_for);

            Some(ProcessObservation {
                process_id: row.pid,
                terminal: row.terminal.clone(),
                elapsed_ms,
                cumulative_cpu_seconds,
                working_directory,
                project_name,
            })
        })
        .collect();

    observations.sort_by_key(|observation| observation.process_id);
    observations
}

fn is_monitored(row: &ProcessRow, config: &ProcessScanConfig) -> bool {
    let name_matches = row
        .command_name()
        .is_some_and(|name| config.executable_pattern.is_match(name));
    let script_matches = || {
        row.command_name()
            .is_some_and(|name| SCRIPT_HOSTS.contains(&name))
            && row
                .arguments()
                .skip(1)
                .any(|argument| config.executable_pattern.is_match(argument))
    };
    let matches = name_matches || script_matches();
    if !matches {
        return false;
    }

    if let Some(pattern) = config
        .exclude_patterns
        .iter()
        .find(|pattern| pattern.is_match(&row.args))
    {
        tracing::trace!(pid = row.pid, pattern = %pattern, "Process excluded");
        return false;
    }
    true
}
