//! Session registry and differencer.
//!
//! The registry is the only state that survives between polls. Each call to
//! [`SessionRegistry::apply`] takes one poll's fused observations and returns
//! the lifecycle events it implies, in order:
//!
//! 1. per observation: `session-appeared` for new keys, or classifier events
//!    for existing ones (a replaced process yields disappeared + appeared);
//! 2. `session-disappeared` for tracked keys absent from this poll;
//! 3. one `snapshot`.
//!
//! Ids are never reused. A base id that was already issued gets a generation
//! suffix (`pid-42~2`).

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};

use pulse_daemon_protocol::{SessionEvent, SessionRecord};

use crate::classifier::{ActivityClassifier, ActivityState, ActivityTransition};
use crate::config::ClassifierConfig;
use crate::duration::format_duration;
use crate::fusion::{DedupKey, FusedObservation};

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub key: DedupKey,
    pub working_directory: Option<String>,
    pub project_name: String,
    pub process_id: Option<u32>,
    pub terminal: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cumulative_cpu_seconds: f64,
    pub cpu_delta_seconds: f64,
    pub activity: ActivityState,
    pub is_remote: bool,
    // Whether elapsed_ms came from a process table rather than the clock.
    elapsed_observed: bool,
    // (pid, cpu seconds) from the previous poll; deltas need two samples
    // from the same process.
    previous_cpu_sample: Option<(u32, f64)>,
    // (pid, last poll it was seen) of the most recent process behind this
    // key. Survives descriptor-only polls.
    last_process: Option<(u32, DateTime<Utc>)>,
}

impl Session {
    fn create(id: String, observation: &FusedObservation, now: DateTime<Utc>) -> Self {
        let started_at = match observation.elapsed_ms {
            Some(elapsed_ms) => now - ChronoDuration::milliseconds(elapsed_ms as i64),
            None => now,
        };
        let activity = if observation.is_remote {
            ActivityState::remote(started_at)
        } else {
            ActivityState::default()
        };

        Self {
            id,
            key: observation.key.clone(),
            working_directory: observation.working_directory.clone(),
            project_name: observation.project_name.clone(),
            process_id: observation.process_id,
            terminal: observation.terminal.clone(),
            started_at,
            elapsed_ms: observation.elapsed_ms.unwrap_or(0),
            cumulative_cpu_seconds: observation.cumulative_cpu_seconds.unwrap_or(0.0),
            cpu_delta_seconds: 0.0,
            activity,
            is_remote: observation.is_remote,
            elapsed_observed: observation.elapsed_ms.is_some(),
            previous_cpu_sample: observation.process_id.zip(observation.cumulative_cpu_seconds),
            last_process: observation.process_id.map(|pid| (pid, now)),
        }
    }

    pub fn busy(&self) -> bool {
        self.activity.busy
    }

    /// A decrease in elapsed or CPU time means a different process took over
    /// this key. So does a new pid that started after the previous process
    /// was last seen, even when polls without a process came in between.
    fn is_replaced_by(&self, observation: &FusedObservation, now: DateTime<Utc>) -> bool {
        let started_later = match (
            self.last_process,
            observation.process_id,
            observation.elapsed_ms,
        ) {
            (Some((pid, last_seen)), Some(current_pid), Some(elapsed_ms)) => {
                pid != current_pid
                    && now - ChronoDuration::milliseconds(elapsed_ms as i64) > last_seen
            }
            _ => false,
        };
        let elapsed_went_back = self.elapsed_observed
            && observation
                .elapsed_ms
                .is_some_and(|elapsed_ms| elapsed_ms < self.elapsed_ms);
        let current = observation.process_id.zip(observation.cumulative_cpu_seconds);
        let cpu_went_back = match (self.previous_cpu_sample, current) {
            (Some((pid, previous)), Some((current_pid, cpu))) => pid == current_pid && cpu < previous,
            _ => false,
        };
        started_later || elapsed_went_back || cpu_went_back
    }

    /// Refreshes fields from this poll and returns the CPU delta to classify,
    /// if two samples from the same process are available.
    fn refresh(&mut self, observation: &FusedObservation, now: DateTime<Utc>) -> Option<f64> {
        if observation.working_directory.is_some() {
            self.working_directory = observation.working_directory.clone();
            self.project_name = observation.project_name.clone();
        }
        if let Some(pid) = observation.process_id {
            self.process_id = Some(pid);
            self.terminal = observation.terminal.clone();
            self.last_process = Some((pid, now));
        }

        match observation.elapsed_ms {
            Some(elapsed_ms) => {
                if !self.elapsed_observed {
                    // First real elapsed value; re-anchor the start estimate.
                    self.started_at = now - ChronoDuration::milliseconds(elapsed_ms as i64);
                    self.elapsed_observed = true;
                }
                self.elapsed_ms = elapsed_ms;
            }
            None => {
                self.elapsed_observed = false;
                self.elapsed_ms = now
                    .signed_duration_since(self.started_at)
                    .num_milliseconds()
                    .max(0) as u64;
            }
        }

        let current = observation.process_id.zip(observation.cumulative_cpu_seconds);
        let delta = match (self.previous_cpu_sample, current) {
            (Some((previous_pid, previous)), Some((pid, cpu))) if previous_pid == pid => {
                Some(cpu - previous)
            }
            _ => None,
        };
        if let Some((_, cpu)) = current {
            self.cumulative_cpu_seconds = cpu;
        }
        self.previous_cpu_sample = current;
        self.cpu_delta_seconds = delta.unwrap_or(0.0);
        delta
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            working_directory: self.working_directory.clone(),
            project_name: self.project_name.clone(),
            process_id: self.process_id,
            terminal: self.terminal.clone(),
            started_at: to_rfc3339(self.started_at),
            elapsed_ms: self.elapsed_ms,
            cumulative_cpu_seconds: self.cumulative_cpu_seconds,
            cpu_delta_seconds: self.cpu_delta_seconds,
            busy: self.activity.busy,
            idle_poll_streak: self.activity.idle_poll_streak,
            busy_since: self.activity.busy_since.map(to_rfc3339),
            is_remote: self.is_remote,
        }
    }

    fn appeared_event(&self) -> SessionEvent {
        SessionEvent::SessionAppeared {
            id: self.id.clone(),
            project_name: self.project_name.clone(),
            working_directory: self.working_directory.clone(),
            remote: self.is_remote,
            elapsed_ms: self.elapsed_ms,
        }
    }

    fn disappeared_event(&self) -> SessionEvent {
        SessionEvent::SessionDisappeared {
            id: self.id.clone(),
            project_name: self.project_name.clone(),
            total_duration: format_duration(self.elapsed_ms),
            total_duration_ms: self.elapsed_ms,
        }
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: BTreeMap<DedupKey, Session>,
    // Highest generation issued per base id, live or retired.
    issued: HashMap<String, u32>,
    classifier: ActivityClassifier,
}

impl SessionRegistry {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            sessions: BTreeMap::new(),
            issued: HashMap::new(),
            classifier: ActivityClassifier::new(config),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.values().find(|session| session.id == id)
    }

    /// Live sessions in key order.
    pub fn list_sessions(&self) -> Vec<&Session> {
        self.sessions.values().collect()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.sessions.values().map(Session::record).collect()
    }

    pub fn busy_count(&self) -> usize {
        self.sessions.values().filter(|session| session.busy()).count()
    }

    pub fn snapshot_event(&self) -> SessionEvent {
        let busy_count = self.busy_count();
        SessionEvent::Snapshot {
            sessions: self.records(),
            busy_count,
            idle_count: self.sessions.len() - busy_count,
        }
    }

    /// Diffs one poll's fused observations against the tracked sessions.
    pub fn apply(
        &mut self,
        observations: &BTreeMap<DedupKey, FusedObservation>,
        now: DateTime<Utc>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        for (key, observation) in observations {
            let replaced = self
                .sessions
                .get(key)
                .is_some_and(|session| session.is_replaced_by(observation, now));
            if replaced {
                if let Some(old) = self.sessions.remove(key) {
                    tracing::info!(
                        session_id = %old.id,
                        key = %key,
                        "Session replaced by a new process"
                    );
                    events.push(old.disappeared_event());
                }
            }

            match self.sessions.get_mut(key) {
                Some(session) => {
                    let Some(delta) = session.refresh(observation, now) else {
                        continue;
                    };
                    if session.is_remote {
                        continue;
                    }
                    let transition = self.classifier.observe(&mut session.activity, delta, now);
                    if let Some(event) = transition_event(session, transition) {
                        events.push(event);
                    }
                }
                None => {
                    let id = self.issue_id(&observation.source_id);
                    let session = Session::create(id, observation, now);
                    tracing::info!(
                        session_id = %session.id,
                        project = %session.project_name,
                        remote = session.is_remote,
                        "Session appeared"
                    );
                    events.push(session.appeared_event());
                    self.sessions.insert(key.clone(), session);
                }
            }
        }

        let gone: Vec<DedupKey> = self
            .sessions
            .keys()
            .filter(|key| !observations.contains_key(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(session) = self.sessions.remove(&key) {
                tracing::info!(
                    session_id = %session.id,
                    duration = %format_duration(session.elapsed_ms),
                    "Session disappeared"
                );
                events.push(session.disappeared_event());
            }
        }

        events.push(self.snapshot_event());
        events
    }

    fn issue_id(&mut self, base: &str) -> String {
        let generation = self.issued.entry(base.to_string()).or_insert(0);
        *generation += 1;
        if *generation == 1 {
            base.to_string()
        } else {
            format!("{}~{}", base, generation)
        }
    }
}

fn transition_event(
    session: &Session,
    transition: Option<ActivityTransition>,
) -> Option<SessionEvent> {
    match transition? {
        ActivityTransition::Started => {
            tracing::info!(session_id = %session.id, "Task started");
            Some(SessionEvent::TaskStarted {
                id: session.id.clone(),
                project_name: session.project_name.clone(),
                working_directory: session.working_directory.clone(),
            })
        }
        ActivityTransition::Finished { busy_duration_ms } => {
            tracing::info!(
                session_id = %session.id,
                busy_duration_ms,
                "Task finished"
            );
            Some(SessionEvent::TaskFinished {
                id: session.id.clone(),
                project_name: session.project_name.clone(),
                working_directory: session.working_directory.clone(),
                busy_duration: format_duration(busy_duration_ms),
                busy_duration_ms,
            })
        }
        ActivityTransition::Settled { busy_duration_ms } => {
            tracing::debug!(
                session_id = %session.id,
                busy_duration_ms,
                "Busy period too short to report"
            );
            None
        }
    }
}
