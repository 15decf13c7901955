use crate::config::RemoteScanConfig;
use crate::duration::parse_ps_time_ms;
use crate::inspector::ProcessRow;

// ssh(1) options that consume the following argument.
const OPTIONS_WITH_VALUE: &str = "bcDEeFIiJLlmOopQRSWw";
// Forwarding, tunnel-only and backgrounded connections.
const NON_INTERACTIVE_FLAGS: &str = "DfLNRW";

/// An outbound interactive remote-shell connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObservation {
    pub process_id: u32,
    pub terminal: Option<String>,
    pub elapsed_ms: u64,
    pub host: String,
    pub user: Option<String>,
}

impl RemoteObservation {
    /// `remote:user@host`, or `remote:host` when no user is known.
    pub fn project_name(&self) -> String {
        match &self.user {
            Some(user) => format!("remote:{}@{}", user, self.host),
            None => format!("remote:{}", self.host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
}

pub fn scan_remote_sessions(
    table: &[ProcessRow],
    config: &RemoteScanConfig,
) -> Vec<RemoteObservation> {
    if !config.enabled {
        return Vec::new();
    }

    let mut observations: Vec<RemoteObservation> = table
        .iter()
        .filter(|row| {
            row.command_name()
                .is_some_and(|name| config.command_pattern.is_match(name))
        })
        .filter_map(|row| {
            let target = parse_ssh_target(row.arguments().skip(1))?;
            let Some(elapsed_ms) = parse_ps_time_ms(&row.elapsed) else {
                tracing::debug!(pid = row.pid, elapsed = %row.elapsed, "Unparseable elapsed time");
                return None;
            };
            Some(RemoteObservation {
                process_id: row.pid,
                terminal: row.terminal.clone(),
                elapsed_ms,
                host: target.host,
                user: target.user,
            })
        })
        .collect();

    observations.sort_by_key(|observation| observation.process_id);
    observations
}

/// Parses ssh arguments (without the program name) into a destination.
///
/// Options are accepted on either side of the destination, as ssh does.
/// Returns `None` for non-interactive invocations: port forwarding, `-N`,
/// `-f`, `BatchMode=yes`, or a remote command without a forced tty (`-t`).
pub fn parse_ssh_target<'a>(args: impl IntoIterator<Item = &'a str>) -> Option<SshTarget> {
    let mut args = args.into_iter();
    let mut login_user: Option<String> = None;
    let mut destination: Option<&str> = None;
    let mut force_tty = false;
    let mut has_command = false;

    while let Some(arg) = args.next() {
        if arg == "--" {
            if destination.is_none() {
                destination = args.next();
            }
            has_command = args.next().is_some();
            break;
        }
        let Some(flags) = arg.strip_prefix('-').filter(|flags| !flags.is_empty()) else {
            if destination.is_none() {
                destination = Some(arg);
                continue;
            }
            has_command = true;
            break;
        };

        for (index, flag) in flags.char_indices() {
            if NON_INTERACTIVE_FLAGS.contains(flag) {
                return None;
            }
            match flag {
                't' => force_tty = true,
                'T' => force_tty = false,
                _ => {}
            }
            if OPTIONS_WITH_VALUE.contains(flag) {
                let inline = &flags[index + flag.len_utf8()..];
                let value = if inline.is_empty() { args.next()? } else { inline };
                match flag {
                    'l' => login_user = Some(value.to_string()),
                    'o' if is_batch_mode(value) => return None,
                    _ => {}
                }
                break;
            }
        }
    }

    let destination = destination?;
    if has_command && !force_tty {
        // One-shot remote command, not an interactive shell.
        return None;
    }

    let (user, host) = split_destination(destination)?;
    Some(SshTarget {
        host,
        user: user.or(login_user),
    })
}

fn is_batch_mode(option: &str) -> bool {
    let normalized = option.to_ascii_lowercase().replace(' ', "=");
    normalized == "batchmode=yes"
}

fn split_destination(destination: &str) -> Option<(Option<String>, String)> {
    let (authority, is_uri) = match destination.strip_prefix("ssh://") {
        Some(rest) => (rest.split('/').next().unwrap_or(rest), true),
        None => (destination, false),
    };

    let (user, host) = match authority.rsplit_once('@') {
        Some((user, host)) => (Some(user.to_string()).filter(|u| !u.is_empty()), host),
        None => (None, authority),
    };

    let host = if is_uri {
        strip_port(host)
    } else {
        host
    };
    if host.is_empty() {
        return None;
    }
    Some((user, host.to_string()))
}

fn strip_port(host: &str) -> &str {
    if let Some(bracketed) = host.strip_prefix('[') {
        return bracketed.split(']').next().unwrap_or(bracketed);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
