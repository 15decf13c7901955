//! End-to-end polls through scanners, fusion, classifier and registry with an
//! in-memory OS.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pulse_core::config::FileConfig;
use pulse_core::fusion::fuse_batch;
use pulse_core::{
    scan_all, EngineConfig, FileEntry, LogSink, OsInspector, Poller, ProcessRow, SessionEvent,
};

const SNAPSHOT_DIR: &str = "/fake/shell-snapshots";

#[derive(Default)]
struct FakeOs {
    files: Vec<(String, DateTime<Utc>, String)>,
    rows: Vec<ProcessRow>,
    cwds: HashMap<u32, String>,
}

#[derive(Default)]
struct FakeInspector {
    os: Mutex<FakeOs>,
}

impl FakeInspector {
    fn update(&self, change: impl FnOnce(&mut FakeOs)) {
        change(&mut self.os.lock().expect("lock"));
    }
}

impl OsInspector for FakeInspector {
    fn list_processes(&self) -> Vec<ProcessRow> {
        self.os.lock().expect("lock").rows.clone()
    }

    fn process_cwd(&self, pid: u32) -> Option<String> {
        self.os.lock().expect("lock").cwds.get(&pid).cloned()
    }

    fn list_dir(&self, dir: &Path) -> Vec<FileEntry> {
        if dir != Path::new(SNAPSHOT_DIR) {
            return Vec::new();
        }
        self.os
            .lock()
            .expect("lock")
            .files
            .iter()
            .map(|(name, modified, _)| FileEntry {
                path: PathBuf::from(SNAPSHOT_DIR).join(name),
                file_name: name.clone(),
                modified: *modified,
            })
            .collect()
    }

    fn read_prefix(&self, path: &Path, max_bytes: usize) -> Option<String> {
        let os = self.os.lock().expect("lock");
        os.files
            .iter()
            .find(|(name, _, _)| PathBuf::from(SNAPSHOT_DIR).join(name) == path)
            .map(|(_, _, content)| content.chars().take(max_bytes).collect())
    }
}

fn t(seconds: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
        + ChronoDuration::seconds(seconds)
}

fn engine_config(threshold: f64, confirm: u32, min_busy_ms: u64) -> EngineConfig {
    let mut file = FileConfig::default();
    file.descriptors.directory = SNAPSHOT_DIR.to_string();
    file.descriptors.freshness_secs = 120;
    file.classifier.cpu_delta_idle_threshold = Some(threshold);
    file.classifier.idle_confirm_polls = confirm;
    file.classifier.min_busy_duration_ms = min_busy_ms;
    EngineConfig::from_file_config(&file).expect("engine config")
}

fn poller(inspector: FakeInspector, config: EngineConfig) -> Poller<FakeInspector> {
    Poller::new(inspector, config, Box::new(LogSink))
}

fn claude_row(pid: u32, elapsed: &str, cpu_time: &str) -> ProcessRow {
    ProcessRow {
        pid,
        terminal: Some("ttys004".to_string()),
        elapsed: elapsed.to_string(),
        cpu_time: cpu_time.to_string(),
        args: "/opt/homebrew/bin/claude".to_string(),
    }
}

fn ssh_row(pid: u32, args: &str) -> ProcessRow {
    ProcessRow {
        pid,
        terminal: Some("ttys009".to_string()),
        elapsed: "01:00:00".to_string(),
        cpu_time: "0:00.50".to_string(),
        args: args.to_string(),
    }
}

fn kinds(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(SessionEvent::kind).collect()
}

fn count(events: &[SessionEvent], kind: &str, id: &str) -> usize {
    events
        .iter()
        .filter(|event| event.kind() == kind && event.session_id() == Some(id))
        .count()
}

#[test]
fn fusing_unchanged_scans_is_idempotent() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.files.push((
            "s1.txt".to_string(),
            t(-5),
            "cd /w/alpha\n".to_string(),
        ));
        os.rows.push(claude_row(100, "05:00", "0:03.00"));
        os.rows.push(claude_row(101, "06:00", "0:04.00"));
        os.rows.push(ssh_row(200, "ssh ops@bastion"));
        os.cwds.insert(100, "/w/alpha".to_string());
    });
    let config = engine_config(0.3, 6, 30_000);

    let first = fuse_batch(&scan_all(&inspector, &config, t(0)));
    let second = fuse_batch(&scan_all(&inspector, &config, t(0)));
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[test]
fn hysteresis_through_the_full_pipeline() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.cwds.insert(7, "/w/beta".to_string());
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 0));

    // Cumulative CPU producing deltas [2.0, 1.5, 0, 0, 0, 0, 0, 0].
    let cumulative = [
        "0:10.00", "0:12.00", "0:13.50", "0:13.50", "0:13.50", "0:13.50", "0:13.50", "0:13.50",
        "0:13.50",
    ];
    let mut busy_after_poll = Vec::new();
    let mut finished_at = None;
    for (poll, cpu) in cumulative.iter().enumerate() {
        let elapsed = format!("00:{:02}", 10 + poll * 5);
        let rows = vec![claude_row(7, &elapsed, cpu)];
        let events = poll_with_rows(&mut poller, rows, t(poll as i64 * 5));
        if events.iter().any(|event| event.kind() == "task-finished") {
            finished_at = Some(poll);
        }
        busy_after_poll.push(poller.registry().get("pid-7").expect("session").busy());
    }

    // Poll 0 only records the first sample; sample index i is poll i + 1.
    assert_eq!(
        busy_after_poll,
        vec![false, true, true, true, true, true, true, true, false]
    );
    assert_eq!(finished_at, Some(8));
}

fn poll_with_rows(
    poller: &mut Poller<FakeInspector>,
    rows: Vec<ProcessRow>,
    now: DateTime<Utc>,
) -> Vec<SessionEvent> {
    poller.inspector().update(|os| os.rows = rows);
    poller.poll_once(now)
}

#[test]
fn short_busy_period_is_not_reported_as_finished() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.cwds.insert(8, "/w/gamma".to_string());
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    let mut events = Vec::new();
    events.extend(poll_with_rows(&mut poller, vec![claude_row(8, "00:10", "0:01.00")], t(0)));
    events.extend(poll_with_rows(&mut poller, vec![claude_row(8, "00:12", "0:03.00")], t(2)));
    // Six quiet polls; the sixth lands 10 seconds after the task started.
    for poll in 1..=6i64 {
        let elapsed = format!("00:{:02}", 12 + poll * 2);
        let now = t(2) + ChronoDuration::milliseconds(poll * 10_000 / 6);
        events.extend(poll_with_rows(
            &mut poller,
            vec![claude_row(8, &elapsed, "0:03.00")],
            now,
        ));
    }

    assert_eq!(count(&events, "task-started", "pid-8"), 1);
    assert_eq!(count(&events, "task-finished", "pid-8"), 0);
    assert!(!poller.registry().get("pid-8").expect("session").busy());
}

#[test]
fn appearance_and_disappearance_are_symmetric() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.cwds.insert(9, "/w/delta".to_string());
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    let mut events = Vec::new();
    for poll in 0..4 {
        let elapsed = format!("00:{:02}", 10 + poll * 5);
        events.extend(poll_with_rows(
            &mut poller,
            vec![claude_row(9, &elapsed, "0:01.00")],
            t(poll as i64 * 5),
        ));
    }
    let present_until = events.len();
    for poll in 4..8 {
        events.extend(poll_with_rows(&mut poller, Vec::new(), t(poll * 5)));
    }

    assert_eq!(count(&events, "session-appeared", "pid-9"), 1);
    assert_eq!(count(&events, "session-disappeared", "pid-9"), 1);
    let disappeared_index = events
        .iter()
        .position(|event| event.kind() == "session-disappeared")
        .expect("disappeared");
    assert!(disappeared_index >= present_until);
    assert!(events[disappeared_index + 1..]
        .iter()
        .all(|event| event.session_id() != Some("pid-9")));
}

#[test]
fn remote_and_local_sessions_never_collapse() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.cwds.insert(10, "/w/remote:u@devbox".to_string());
        os.rows.push(claude_row(10, "02:00", "0:01.00"));
        os.rows.push(ssh_row(11, "ssh u@devbox"));
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    let events = poller.poll_once(t(0));
    assert_eq!(
        kinds(&events),
        vec!["session-appeared", "session-appeared", "snapshot"]
    );

    let sessions = poller.registry().list_sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .all(|session| session.project_name == "remote:u@devbox"));
    let remote = sessions
        .iter()
        .find(|session| session.is_remote)
        .expect("remote session");
    assert_eq!(remote.id, "remote-devbox");
    assert!(remote.busy());
    assert!(remote.process_id.is_none());
    let local = sessions
        .iter()
        .find(|session| !session.is_remote)
        .expect("local session");
    assert_eq!(local.process_id, Some(10));
}

#[test]
fn stale_descriptor_session_disappears() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.files.push((
            "abc123.txt".to_string(),
            t(-10),
            "source /home/u/proj/.claude/settings.local.json\n".to_string(),
        ));
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    let first = poller.poll_once(t(0));
    assert_eq!(kinds(&first), vec!["session-appeared", "snapshot"]);
    let session = poller.registry().get("abc123").expect("session");
    assert_eq!(session.working_directory.as_deref(), Some("/home/u/proj"));
    assert_eq!(session.project_name, "proj");
    assert!(session.process_id.is_none());

    // Same mtime, now 130 seconds old against a 120 second threshold.
    let second = poller.poll_once(t(120));
    assert_eq!(kinds(&second), vec!["session-disappeared", "snapshot"]);
    assert_eq!(second[0].session_id(), Some("abc123"));
    assert!(poller.registry().is_empty());
}

#[test]
fn descriptor_and_process_share_one_session() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.files.push((
            "abc123.txt".to_string(),
            t(-1),
            "{\"cwd\": \"/home/u/proj\"}".to_string(),
        ));
        os.rows.push(claude_row(55, "10:00", "0:20.00"));
        os.cwds.insert(55, "/home/u/proj".to_string());
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    poller.poll_once(t(0));
    let sessions = poller.registry().list_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "abc123");
    assert_eq!(sessions[0].process_id, Some(55));
    assert_eq!(sessions[0].elapsed_ms, 600_000);
    assert_eq!(sessions[0].started_at, t(-600));
}

#[test]
fn new_process_behind_a_fresh_descriptor_starts_a_new_session() {
    let inspector = FakeInspector::default();
    inspector.update(|os| {
        os.files.push((
            "abc123.txt".to_string(),
            t(-1),
            "{\"cwd\": \"/home/u/proj\"}".to_string(),
        ));
        os.rows.push(claude_row(55, "10:00", "0:20.00"));
        os.cwds.insert(55, "/home/u/proj".to_string());
    });
    let mut poller = poller(inspector, engine_config(0.3, 6, 30_000));

    poller.poll_once(t(0));
    poller.inspector().update(|os| os.rows.clear());
    let exited = poller.poll_once(t(5));
    assert_eq!(kinds(&exited), vec!["snapshot"]);

    poller.inspector().update(|os| {
        os.rows.push(claude_row(56, "00:05", "0:00.50"));
        os.cwds.insert(56, "/home/u/proj".to_string());
    });
    let events = poller.poll_once(t(10));
    assert_eq!(
        kinds(&events),
        vec!["session-disappeared", "session-appeared", "snapshot"]
    );
    assert_eq!(events[0].session_id(), Some("abc123"));
    assert_eq!(events[1].session_id(), Some("abc123~2"));
    let session = poller.registry().get("abc123~2").expect("session");
    assert_eq!(session.process_id, Some(56));
    assert_eq!(session.elapsed_ms, 5_000);
}
