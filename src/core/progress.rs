/*!
 * Progress events for deploy runs
 *
 * The orchestrator publishes immutable events over a channel; whatever is
 * attached on the other end (a terminal renderer, a JSON log, a test) decides
 * how to show them. Events for one run arrive in order:
 *
 * `Scanning` → `ScanProgress`* → `Diffing` → `Uploading`* → `Committing` → `Done`,
 * with `Warning`s interleaved and `Failed` replacing the tail on error.
 */

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use super::orphans::OrphanRecord;

/// Progress event types
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Walking the local tree
    Scanning { root: PathBuf, timestamp: u64 },

    /// Files hashed so far
    ScanProgress { files_hashed: usize, timestamp: u64 },

    /// Fetching remote state and computing the diff
    Diffing { timestamp: u64 },

    /// Uploads finished so far out of the total
    Uploading {
        done: usize,
        total: usize,
        timestamp: u64,
    },

    /// Submitting ledger transactions
    Committing { transactions: usize, timestamp: u64 },

    /// Something was skipped but the run continues
    Warning { message: String, timestamp: u64 },

    /// The ledger confirmed every transaction
    Done { mutations: usize, timestamp: u64 },

    /// The run stopped; `orphans` lists content left without a resource
    Failed {
        reason: String,
        orphans: Vec<OrphanRecord>,
        timestamp: u64,
    },
}

impl ProgressEvent {
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn scanning(root: PathBuf) -> Self {
        ProgressEvent::Scanning {
            root,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn scan_progress(files_hashed: usize) -> Self {
        ProgressEvent::ScanProgress {
            files_hashed,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn diffing() -> Self {
        ProgressEvent::Diffing {
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn uploading(done: usize, total: usize) -> Self {
        ProgressEvent::Uploading {
            done,
            total,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn committing(transactions: usize) -> Self {
        ProgressEvent::Committing {
            transactions,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        ProgressEvent::Warning {
            message: message.into(),
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn done(mutations: usize) -> Self {
        ProgressEvent::Done {
            mutations,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn failed(reason: impl Into<String>, orphans: Vec<OrphanRecord>) -> Self {
        ProgressEvent::Failed {
            reason: reason.into(),
            orphans,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Short lowercase label, e.g. for log lines
    pub fn label(&self) -> &'static str {
        match self {
            ProgressEvent::Scanning { .. } => "scanning",
            ProgressEvent::ScanProgress { .. } => "scan_progress",
            ProgressEvent::Diffing { .. } => "diffing",
            ProgressEvent::Uploading { .. } => "uploading",
            ProgressEvent::Committing { .. } => "committing",
            ProgressEvent::Warning { .. } => "warning",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Failed { .. } => "failed",
        }
    }
}

/// Progress publisher - sends events to subscribers
#[derive(Clone)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressPublisher {
    /// Create a new publisher with bounded channel
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a new publisher with unbounded channel
    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a no-op publisher (for when progress tracking is disabled)
    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }

    /// Publish an event
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event); // subscriber may have dropped
        }
    }
}

/// Progress subscriber - receives events
pub struct ProgressSubscriber {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressSubscriber {
    /// Get the receiver for consuming events
    pub fn receiver(&self) -> &Receiver<ProgressEvent> {
        &self.receiver
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv(&self) -> Option<ProgressEvent> {
        self.receiver.recv().ok()
    }

    /// Everything published so far, without blocking
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.receiver.try_iter().collect()
    }
}
