//! Event delivery.
//!
//! Sinks are called on the poll thread and must not block it. The channel
//! sink queues; a disconnected receiver just drops events.

use std::sync::mpsc::Sender;

use pulse_daemon_protocol::SessionEvent;

pub trait EventSink: Send {
    fn emit(&self, event: &SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(&SessionEvent) + Send,
{
    fn emit(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Queues events on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<SessionEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &SessionEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(kind = event.kind(), "Event receiver gone; dropping event");
        }
    }
}

/// Writes lifecycle events to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Snapshot {
                busy_count,
                idle_count,
                ..
            } => tracing::debug!(busy_count, idle_count, "Sessions updated"),
            _ => tracing::info!(
                kind = event.kind(),
                session_id = event.session_id().unwrap_or_default(),
                "Session event"
            ),
        }
    }
}

#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &SessionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn appeared(id: &str) -> SessionEvent {
        SessionEvent::SessionAppeared {
            id: id.to_string(),
            project_name: "proj".to_string(),
            working_directory: Some("/w/proj".to_string()),
            remote: false,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn channel_sink_queues_and_survives_dropped_receiver() {
        let (sender, receiver) = mpsc::channel();
        let sink = ChannelSink::new(sender);
        sink.emit(&appeared("a"));
        assert_eq!(receiver.try_recv().ok(), Some(appeared("a")));

        drop(receiver);
        sink.emit(&appeared("b"));
    }

    #[test]
    fn fanout_delivers_to_every_sink_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let fanout = FanoutSink::new()
            .with(move |event: &SessionEvent| {
                first.lock().expect("lock").push(format!("1:{}", event.kind()));
            })
            .with(move |event: &SessionEvent| {
                second.lock().expect("lock").push(format!("2:{}", event.kind()));
            })
            .with(LogSink);

        fanout.emit(&appeared("a"));
        assert_eq!(fanout.len(), 3);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["1:session-appeared".to_string(), "2:session-appeared".to_string()]
        );
    }
}
