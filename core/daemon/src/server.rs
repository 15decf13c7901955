//! Query surface: newline-delimited JSON over a Unix socket.
//!
//! Handlers only read the published snapshot; the registry stays owned by
//! the poll thread.

use chrono::{DateTime, Utc};
use fs_err as fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{PoisonError, RwLockReadGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use pulse_core::{SessionsSnapshot, SharedSessions};
use pulse_daemon_protocol::{ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Clone)]
pub struct ServerState {
    pub sessions: SharedSessions,
    pub started_at: DateTime<Utc>,
    pub poll_interval: Duration,
}

pub fn prepare_socket(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))?;
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

/// Accepts connections forever, one short-lived thread per request.
pub fn serve(listener: UnixListener, state: ServerState) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = state.clone();
                thread::spawn(move || handle_connection(stream, &state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, state: &ServerState) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let _ = write_response(&mut stream, Response::error_with_info(None, err));
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Request received");
    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    parse_request(&buffer)
}

fn parse_request(buffer: &[u8]) -> Result<Request, ErrorInfo> {
    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer,
    };
    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn read_snapshot(state: &ServerState) -> RwLockReadGuard<'_, SessionsSnapshot> {
    state
        .sessions
        .read()
        .unwrap_or_else(PoisonError::into_inner)
}

pub fn handle_request(request: Request, state: &ServerState) -> Response {
    if let Err(err) = request.validate() {
        return Response::error_with_info(request.id, err);
    }

    let snapshot = read_snapshot(state);
    let result = match request.method {
        Method::GetHealth => Ok(serde_json::json!({
            "status": "ok",
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": PROTOCOL_VERSION,
            "started_at": state.started_at.to_rfc3339(),
            "poll_interval_ms": state.poll_interval.as_millis() as u64,
            "poll_count": snapshot.poll_count,
            "skipped_ticks": snapshot.skipped_ticks,
            "last_poll_at": snapshot.polled_at.map(|at| at.to_rfc3339()),
        })),
        Method::GetSessions => {
            debug!(sessions = snapshot.sessions.len(), "Sessions snapshot");
            serde_json::to_value(&snapshot.sessions)
        }
        Method::GetSnapshot => serde_json::to_value(&*snapshot),
    };

    match result {
        Ok(value) => Response::ok(request.id, value),
        Err(err) => Response::error(
            request.id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_daemon_protocol::SessionRecord;
    use std::sync::{Arc, RwLock};

    fn state_with(sessions: Vec<SessionRecord>) -> ServerState {
        let busy_count = sessions.iter().filter(|session| session.busy).count();
        let snapshot = SessionsSnapshot {
            idle_count: sessions.len() - busy_count,
            busy_count,
            sessions,
            polled_at: Some(Utc::now()),
            poll_count: 3,
            skipped_ticks: 0,
        };
        ServerState {
            sessions: Arc::new(RwLock::new(snapshot)),
            started_at: Utc::now(),
            poll_interval: Duration::from_secs(5),
        }
    }

    fn record(id: &str, busy: bool) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            working_directory: Some(format!("/w/{}", id)),
            project_name: id.to_string(),
            process_id: Some(42),
            terminal: None,
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            elapsed_ms: 1_000,
            cumulative_cpu_seconds: 1.0,
            cpu_delta_seconds: 0.0,
            busy,
            idle_poll_streak: 0,
            busy_since: None,
            is_remote: false,
        }
    }

    #[test]
    fn get_sessions_returns_published_records() {
        let state = state_with(vec![record("alpha", true), record("beta", false)]);
        let response = handle_request(
            Request::new(Method::GetSessions, Some("req-1".to_string())),
            &state,
        );

        assert!(response.ok);
        assert_eq!(response.id.as_deref(), Some("req-1"));
        let data = response.data.expect("data");
        let sessions: Vec<SessionRecord> = serde_json::from_value(data).expect("records");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "alpha");
    }

    #[test]
    fn get_snapshot_carries_counts() {
        let state = state_with(vec![record("alpha", true), record("beta", false)]);
        let response = handle_request(Request::new(Method::GetSnapshot, None), &state);
        let data = response.data.expect("data");
        assert_eq!(data["busy_count"], 1);
        assert_eq!(data["idle_count"], 1);
        assert_eq!(data["poll_count"], 3);
    }

    #[test]
    fn protocol_mismatch_is_rejected() {
        let state = state_with(Vec::new());
        let mut request = Request::new(Method::GetHealth, None);
        request.protocol_version = PROTOCOL_VERSION + 1;
        let response = handle_request(request, &state);
        assert!(!response.ok);
        assert_eq!(
            response.error.map(|err| err.code),
            Some("protocol_mismatch".to_string())
        );
    }

    #[test]
    fn parse_request_rejects_empty_and_invalid_bodies() {
        assert_eq!(
            parse_request(b"  \n").expect_err("empty").code,
            "empty_request"
        );
        assert_eq!(
            parse_request(b"{not json}\n").expect_err("invalid").code,
            "invalid_json"
        );
        let request =
            parse_request(b"{\"protocol_version\":1,\"method\":\"get_health\"}\ntrailing")
                .expect("valid");
        assert_eq!(request.method, Method::GetHealth);
    }
}
