//! OS inspection seam.
//!
//! Everything non-portable and blocking lives behind `OsInspector`: listing
//! the process table, resolving a process's working directory, listing a
//! directory with modification times and reading a bounded file prefix.
//! The scanners, fusion and classifier above it are pure and are tested with
//! an in-memory inspector.
//!
//! Every operation degrades to an empty result. "Command not found",
//! "permission denied" and timeouts are logged, never propagated.

use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

use crate::error::{PulseError, Result};

const WAIT_STEP: Duration = Duration::from_millis(10);
const PS_FORMAT: &str = "pid=,tty=,etime=,time=,args=";

/// One row of the OS process table, with time columns left as printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub pid: u32,
    pub terminal: Option<String>,
    pub elapsed: String,
    pub cpu_time: String,
    pub args: String,
}

impl ProcessRow {
    /// Basename of the executable (first argument).
    pub fn command_name(&self) -> Option<&str> {
        let program = self.args.split_whitespace().next()?;
        program.rsplit('/').next().filter(|name| !name.is_empty())
    }

    pub fn arguments(&self) -> impl Iterator<Item = &str> {
        self.args.split_whitespace()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: DateTime<Utc>,
}

pub trait OsInspector {
    /// Snapshot of the process table.
    fn list_processes(&self) -> Vec<ProcessRow>;

    /// Current working directory of `pid`, best-effort.
    fn process_cwd(&self, pid: u32) -> Option<String>;

    /// Regular files in `dir` with their modification times.
    fn list_dir(&self, dir: &Path) -> Vec<FileEntry>;

    /// At most `max_bytes` of `path`, lossily decoded.
    fn read_prefix(&self, path: &Path, max_bytes: usize) -> Option<String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// System Inspector
// ═══════════════════════════════════════════════════════════════════════════════

/// Inspector backed by `ps`, sysinfo (with an `lsof` fallback) and the filesystem.
pub struct SystemInspector {
    command_timeout: Duration,
    // Per-pid refreshes only; never a full process scan.
    system: RefCell<System>,
}

impl SystemInspector {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            system: RefCell::new(System::new()),
        }
    }

    fn cwd_from_sysinfo(&self, pid: u32) -> Option<String> {
        let mut sys = self.system.borrow_mut();
        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(
            sysinfo_pid,
            ProcessRefreshKind::new().with_cwd(UpdateKind::Always),
        );
        let cwd = sys.process(sysinfo_pid)?.cwd()?;
        let cwd = cwd.to_string_lossy().to_string();
        if cwd.is_empty() {
            None
        } else {
            Some(cwd)
        }
    }

    fn cwd_from_lsof(&self, pid: u32) -> Option<String> {
        let pid_arg = pid.to_string();
        let output = run_command(
            "lsof",
            &["-a", "-p", &pid_arg, "-d", "cwd", "-Fn"],
            self.command_timeout,
        )
        .map_err(|err| {
            tracing::debug!(pid, error = %err, "lsof cwd lookup failed");
        })
        .ok()?;
        parse_lsof_cwd(&output)
    }
}

impl OsInspector for SystemInspector {
    fn list_processes(&self) -> Vec<ProcessRow> {
        match run_command("ps", &["-axo", PS_FORMAT], self.command_timeout) {
            Ok(output) => parse_ps_output(&output),
            Err(err) => {
                tracing::warn!(error = %err, "Process table unavailable");
                Vec::new()
            }
        }
    }

    fn process_cwd(&self, pid: u32) -> Option<String> {
        self.cwd_from_sysinfo(pid)
            .or_else(|| self.cwd_from_lsof(pid))
    }

    fn list_dir(&self, dir: &Path) -> Vec<FileEntry> {
        let entries = match fs_err::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %dir.display(), "Descriptor directory missing");
                } else {
                    tracing::warn!(error = %err, "Descriptor directory unreadable");
                }
                return Vec::new();
            }
        };

        entries
            .flatten()
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let modified = metadata.modified().ok()?;
                Some(FileEntry {
                    path: entry.path(),
                    file_name: entry.file_name().to_string_lossy().to_string(),
                    modified: DateTime::<Utc>::from(modified),
                })
            })
            .collect()
    }

    fn read_prefix(&self, path: &Path, max_bytes: usize) -> Option<String> {
        let file = fs_err::File::open(path)
            .map_err(|err| tracing::debug!(error = %err, "Descriptor unreadable"))
            .ok()?;
        let mut buffer = Vec::with_capacity(max_bytes.min(8 * 1024));
        file.take(max_bytes as u64)
            .read_to_end(&mut buffer)
            .map_err(|err| tracing::debug!(error = %err, "Descriptor read failed"))
            .ok()?;
        Some(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Runs `program` with a hard timeout, returning stdout on success.
///
/// stdout is drained on a helper thread so a chatty child cannot block on a
/// full pipe while we wait. On timeout the child is killed.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| PulseError::CommandFailed {
            command: program.to_string(),
            details: err.to_string(),
        })?;

    let mut stdout = child.stdout.take().ok_or_else(|| PulseError::CommandFailed {
        command: program.to_string(),
        details: "stdout not captured".to_string(),
    })?;
    let reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stdout.read_to_end(&mut buffer);
        buffer
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(PulseError::CommandTimedOut {
                    command: program.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(None) => thread::sleep(WAIT_STEP),
            Err(err) => {
                let _ = child.kill();
                let _ = reader.join();
                return Err(PulseError::CommandFailed {
                    command: program.to_string(),
                    details: err.to_string(),
                });
            }
        }
    };

    let output = reader.join().unwrap_or_default();
    if !status.success() {
        return Err(PulseError::CommandFailed {
            command: program.to_string(),
            details: format!("exited with {}", status),
        });
    }
    Ok(String::from_utf8_lossy(&output).into_owned())
}

pub fn parse_ps_output(output: &str) -> Vec<ProcessRow> {
    output.lines().filter_map(parse_ps_line).collect()
}

/// Parses one `pid tty etime time args...` line; malformed lines are skipped.
pub fn parse_ps_line(line: &str) -> Option<ProcessRow> {
    let (pid, rest) = next_field(line)?;
    let (tty, rest) = next_field(rest)?;
    let (elapsed, rest) = next_field(rest)?;
    let (cpu_time, rest) = next_field(rest)?;
    let args = rest.trim();
    if args.is_empty() {
        return None;
    }

    Some(ProcessRow {
        pid: pid.parse().ok()?,
        terminal: normalize_terminal(tty),
        elapsed: elapsed.to_string(),
        cpu_time: cpu_time.to_string(),
        args: args.to_string(),
    })
}

fn next_field(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.find(char::is_whitespace) {
        Some(index) => Some((&trimmed[..index], &trimmed[index..])),
        None => Some((trimmed, "")),
    }
}

// `ps` prints `?` (Linux) or `??` (macOS) for processes without a terminal.
fn normalize_terminal(tty: &str) -> Option<String> {
    if tty.chars().all(|c| c == '?' || c == '-') {
        None
    } else {
        Some(tty.to_string())
    }
}

fn parse_lsof_cwd(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .filter(|path| path.starts_with('/'))
        .map(str::to_string)
}
