use std::path::PathBuf;

use crate::manifest::ManifestEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Skip,
    Copy,
    Download { extract: bool },
}

/// Working record for one manifest entry while a worker processes it.
#[derive(Debug)]
pub struct TransferUnit {
    pub entry: ManifestEntry,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub action: Action,
    credited: u64,
}

impl TransferUnit {
    pub fn new(entry: ManifestEntry, src: PathBuf, dst: PathBuf, action: Action) -> Self {
        Self {
            entry,
            src,
            dst,
            action,
            credited: 0,
        }
    }

    /// Record `bytes` of progress, capped so the unit never credits more than
    /// its session weight. Returns the amount actually granted.
    pub fn credit(&mut self, bytes: u64) -> u64 {
        let room = self.entry.session_weight().saturating_sub(self.credited);
        let granted = bytes.min(room);
        self.credited += granted;
        granted
    }

    pub fn credited(&self) -> u64 {
        self.credited
    }

    /// The closing credit that lands this unit exactly on its session weight.
    pub fn true_up(&mut self) -> u64 {
        let remaining = self.entry.session_weight().saturating_sub(self.credited);
        self.credited += remaining;
        remaining
    }
}

/// Work handed to an idle worker.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub entry: ManifestEntry,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    Diagnostic(String),
    Progress(u64),
    /// The final credit for the current unit; the worker is idle afterwards.
    UnitComplete(u64),
    /// Closes a unit that ended in error. Credits nothing further.
    UnitFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionProgress {
    pub completed_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    /// Units closed by a worker, failed ones included.
    pub units_completed: usize,
    pub units_failed: usize,
    /// Units still in the backlog when the session ended.
    pub units_unassigned: usize,
}
