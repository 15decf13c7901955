//! Poll loop.
//!
//! The poller owns the registry. Polls run on one thread; ticks come from a
//! separate timer thread on a fixed schedule, and ticks that pile up during a
//! slow poll are drained and counted as skipped, so polls never overlap.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use pulse_daemon_protocol::{SessionEvent, SessionRecord};

use crate::config::EngineConfig;
use crate::events::EventSink;
use crate::fusion::fuse_batch;
use crate::inspector::OsInspector;
use crate::registry::SessionRegistry;
use crate::scanners::scan_all;

/// Read-only view of the registry, published after every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionsSnapshot {
    pub sessions: Vec<SessionRecord>,
    pub busy_count: usize,
    pub idle_count: usize,
    pub polled_at: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub skipped_ticks: u64,
}

pub type SharedSessions = Arc<RwLock<SessionsSnapshot>>;

pub struct Poller<I: OsInspector> {
    inspector: I,
    config: EngineConfig,
    registry: SessionRegistry,
    sink: Box<dyn EventSink>,
    shared: SharedSessions,
    poll_count: u64,
    skipped_ticks: u64,
}

impl<I: OsInspector> Poller<I> {
    pub fn new(inspector: I, config: EngineConfig, sink: Box<dyn EventSink>) -> Self {
        Self {
            registry: SessionRegistry::new(config.classifier.clone()),
            inspector,
            config,
            sink,
            shared: Arc::new(RwLock::new(SessionsSnapshot::default())),
            poll_count: 0,
            skipped_ticks: 0,
        }
    }

    /// Handle for readers; stays valid after the poller moves to its thread.
    pub fn shared(&self) -> SharedSessions {
        Arc::clone(&self.shared)
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// One scan, fuse, classify and diff cycle. Events go to the sink and
    /// are also returned.
    pub fn poll_once(&mut self, now: DateTime<Utc>) -> Vec<SessionEvent> {
        let batch = scan_all(&self.inspector, &self.config, now);
        let fused = fuse_batch(&batch);
        let events = self.registry.apply(&fused, now);
        self.poll_count += 1;

        for event in &events {
            self.sink.emit(event);
        }
        self.publish(now);
        events
    }

    fn publish(&self, now: DateTime<Utc>) {
        let busy_count = self.registry.busy_count();
        let snapshot = SessionsSnapshot {
            sessions: self.registry.records(),
            busy_count,
            idle_count: self.registry.len() - busy_count,
            polled_at: Some(now),
            poll_count: self.poll_count,
            skipped_ticks: self.skipped_ticks,
        };
        match self.shared.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Polls immediately, then once per interval until `shutdown` is set.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        let interval = self.config.poll_interval;
        let (tick_tx, tick_rx) = mpsc::channel::<()>();
        let ticker_shutdown = Arc::clone(&shutdown);
        let ticker = thread::spawn(move || run_ticker(interval, tick_tx, ticker_shutdown));

        tracing::info!(interval_ms = interval.as_millis() as u64, "Poller started");
        self.poll_once(Utc::now());

        while tick_rx.recv().is_ok() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.poll_once(Utc::now());

            let skipped = tick_rx.try_iter().count() as u64;
            if skipped > 0 {
                self.skipped_ticks += skipped;
                tracing::warn!(skipped, "Poll overran its interval; ticks coalesced");
            }
        }

        drop(tick_rx);
        if ticker.join().is_err() {
            tracing::warn!("Ticker thread panicked");
        }
        tracing::info!(polls = self.poll_count, "Poller stopped");
    }
}

fn run_ticker(interval: Duration, ticks: mpsc::Sender<()>, shutdown: Arc<AtomicBool>) {
    loop {
        thread::sleep(interval);
        if shutdown.load(Ordering::SeqCst) {
            // Wake the poll loop so it sees the flag.
            let _ = ticks.send(());
            return;
        }
        if ticks.send(()).is_err() {
            return;
        }
    }
}
