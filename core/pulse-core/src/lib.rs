//! # pulse-core
//!
//! Session detection and activity classification for the `claude` CLI.
//!
//! Three scanners look at independent, imperfect signals (descriptor files,
//! the process table, outbound ssh connections). Fusion merges them into one
//! canonical session per project directory or remote host, a hysteresis
//! classifier turns CPU-time deltas into busy/idle, and the registry diffs
//! polls into lifecycle events.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The poller runs on its own thread.
//! - **Graceful degradation**: Missing files, commands or permissions yield
//!   empty scanner results, never errors.
//! - **One writer**: The registry is owned by the poller; readers see a
//!   published snapshot.
//! - **Pure core**: Everything above [`inspector::OsInspector`] is a function
//!   of its inputs and is tested without touching the OS.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pulse_core::{load_engine_config, LogSink, Poller, SystemInspector};
//!
//! let config = load_engine_config(None)?;
//! let inspector = SystemInspector::new(config.command_timeout);
//! let mut poller = Poller::new(inspector, config, Box::new(LogSink));
//! let events = poller.poll_once(chrono::Utc::now());
//! ```

pub mod classifier;
pub mod config;
pub mod duration;
pub mod error;
pub mod events;
pub mod fusion;
pub mod inspector;
pub mod patterns;
pub mod poller;
pub mod registry;
pub mod scanners;

pub use classifier::{ActivityClassifier, ActivityState, ActivityTransition};
pub use config::{load_engine_config, load_file_config, EngineConfig, FileConfig};
pub use duration::format_duration;
pub use error::{PulseError, Result};
pub use events::{ChannelSink, EventSink, FanoutSink, LogSink};
pub use fusion::{fuse, DedupKey, FusedObservation};
pub use inspector::{FileEntry, OsInspector, ProcessRow, SystemInspector};
pub use poller::{Poller, SessionsSnapshot, SharedSessions};
pub use registry::{Session, SessionRegistry};
pub use scanners::{scan_all, ScanBatch};

pub use pulse_daemon_protocol::{SessionEvent, SessionRecord};
