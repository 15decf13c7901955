//! Event and IPC protocol types for pulse-daemon.
//!
//! This crate is shared by the detection engine, the daemon and its clients to
//! prevent schema drift. The engine is the only producer of `SessionEvent`s;
//! consumers (notifications, dashboards, usage attribution) only read them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024; // 64KB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetSessions,
    GetSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params: None,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                "unsupported protocol version",
            ));
        }
        if let Some(id) = &self.id {
            if id.len() > 128 {
                return Err(ErrorInfo::new(
                    "invalid_id",
                    "id must be 128 characters or fewer",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Serializable view of one tracked session.
///
/// Timestamps are RFC3339 strings so clients need no date library to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    pub project_name: String,
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub terminal: Option<String>,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub cumulative_cpu_seconds: f64,
    pub cpu_delta_seconds: f64,
    pub busy: bool,
    pub idle_poll_streak: u32,
    #[serde(default)]
    pub busy_since: Option<String>,
    pub is_remote: bool,
}

/// Lifecycle events emitted by the detection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionAppeared {
        id: String,
        project_name: String,
        working_directory: Option<String>,
        remote: bool,
        elapsed_ms: u64,
    },
    SessionDisappeared {
        id: String,
        project_name: String,
        total_duration: String,
        total_duration_ms: u64,
    },
    TaskStarted {
        id: String,
        project_name: String,
        working_directory: Option<String>,
    },
    TaskFinished {
        id: String,
        project_name: String,
        working_directory: Option<String>,
        busy_duration: String,
        busy_duration_ms: u64,
    },
    Snapshot {
        sessions: Vec<SessionRecord>,
        busy_count: usize,
        idle_count: usize,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionAppeared { .. } => "session-appeared",
            SessionEvent::SessionDisappeared { .. } => "session-disappeared",
            SessionEvent::TaskStarted { .. } => "task-started",
            SessionEvent::TaskFinished { .. } => "task-finished",
            SessionEvent::Snapshot { .. } => "snapshot",
        }
    }

    /// The session this event refers to; `None` for snapshots.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionAppeared { id, .. }
            | SessionEvent::SessionDisappeared { id, .. }
            | SessionEvent::TaskStarted { id, .. }
            | SessionEvent::TaskFinished { id, .. } => Some(id.as_str()),
            SessionEvent::Snapshot { .. } => None,
        }
    }
}
