use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::models::{
    Assignment, SessionOutcome, SessionProgress, SessionState, WorkerEvent,
};
use crate::engine::worker::{self, WorkerContext, WorkerHandle};
use crate::manifest::{Manifest, ManifestEntry};
use crate::networking::NetworkClient;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub full_scan: bool,
    /// Number of concurrent workers; values below one are raised to one.
    pub pool_size: usize,
}

/// Caller-side view of a running session.
pub struct SessionHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<SessionProgress>,
    controller: JoinHandle<Result<SessionOutcome, String>>,
}

impl SessionHandle {
    /// Stop the session now. Progress stops being published immediately and
    /// every worker is terminated without waiting for its transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionProgress> {
        self.progress.clone()
    }

    /// Resolves once the session reaches `Completed` or `Cancelled`.
    pub async fn wait(&mut self) -> Result<SessionOutcome, String> {
        (&mut self.controller)
            .await
            .map_err(|e| format!("session task failed: {e}"))?
    }
}

/// Start reconciling `options.dest_dir` against `manifest`. Must be called
/// from within a tokio runtime.
pub fn start_session(
    manifest: Manifest,
    options: SessionOptions,
    network: NetworkClient,
) -> SessionHandle {
    let total_bytes = manifest.total_weight();
    let (progress_tx, progress) = watch::channel(SessionProgress {
        completed_bytes: 0,
        total_bytes,
    });
    let cancel = CancellationToken::new();
    let session = InstallSession {
        state: SessionState::Idle,
        backlog: manifest.into_entries().into(),
        ctx: Arc::new(WorkerContext {
            network,
            full_scan: options.full_scan,
            cancel: cancel.clone(),
        }),
        options,
        workers: BTreeMap::new(),
        completed_bytes: 0,
        total_bytes,
        units_completed: 0,
        units_failed: 0,
        sink: progress_tx,
        cancel: cancel.clone(),
    };
    let controller = tokio::spawn(session.run());
    SessionHandle {
        cancel,
        progress,
        controller,
    }
}

struct InstallSession {
    state: SessionState,
    backlog: VecDeque<ManifestEntry>,
    ctx: Arc<WorkerContext>,
    options: SessionOptions,
    workers: BTreeMap<usize, WorkerHandle>,
    completed_bytes: u64,
    total_bytes: u64,
    units_completed: usize,
    units_failed: usize,
    sink: watch::Sender<SessionProgress>,
    cancel: CancellationToken,
}

impl InstallSession {
    async fn run(mut self) -> Result<SessionOutcome, String> {
        if self.cancel.is_cancelled() {
            return Ok(self.finish(SessionState::Cancelled));
        }
        self.state = SessionState::Running;
        let pool_size = self.options.pool_size.max(1).min(self.backlog.len());
        info!(
            "session: {} units, {} bytes, {} worker(s), full_scan={}",
            self.backlog.len(),
            self.total_bytes,
            pool_size,
            self.options.full_scan
        );

        let (events_tx, mut events) = mpsc::unbounded_channel();
        for id in 0..pool_size {
            let handle = worker::spawn_worker(id, self.ctx.clone(), events_tx.clone());
            self.workers.insert(id, handle);
            self.assign_next(id);
        }
        drop(events_tx);

        while !self.workers.is_empty() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("session: cancelled with {} units queued", self.backlog.len());
                    for handle in self.workers.values() {
                        handle.abort();
                    }
                    self.workers.clear();
                    return Ok(self.finish(SessionState::Cancelled));
                }
                event = events.recv() => match event {
                    Some((id, event)) => self.handle_event(id, event),
                    None => {
                        error!("session: workers exited with units outstanding");
                        return Err(format!(
                            "all workers stopped before finishing ({} of {} bytes)",
                            self.completed_bytes, self.total_bytes
                        ));
                    }
                },
            }
        }

        info!(
            "session: completed {} units ({} failed), {} of {} bytes",
            self.units_completed, self.units_failed, self.completed_bytes, self.total_bytes
        );
        Ok(self.finish(SessionState::Completed))
    }

    fn handle_event(&mut self, id: usize, event: WorkerEvent) {
        match event {
            WorkerEvent::Diagnostic(text) => info!("worker {id}: {text}"),
            WorkerEvent::Progress(bytes) => {
                self.completed_bytes += bytes;
                self.publish();
            }
            WorkerEvent::UnitComplete(bytes) => self.close_unit(id, bytes),
            WorkerEvent::UnitFailed => {
                self.units_failed += 1;
                self.close_unit(id, 0);
            }
        }
    }

    fn close_unit(&mut self, id: usize, bytes: u64) {
        self.completed_bytes += bytes;
        self.units_completed += 1;
        self.publish();
        if self.cancel.is_cancelled() {
            return;
        }
        if self.backlog.is_empty() {
            if let Some(handle) = self.workers.remove(&id) {
                handle.retire();
            }
        } else {
            self.assign_next(id);
        }
    }

    fn assign_next(&mut self, id: usize) {
        let Some(entry) = self.backlog.pop_front() else {
            return;
        };
        let Some(handle) = self.workers.get(&id) else {
            self.backlog.push_front(entry);
            return;
        };
        debug!("session: assigning {} to worker {id}", entry.name);
        let assignment = Assignment {
            entry,
            source_dir: self.options.source_dir.clone(),
            dest_dir: self.options.dest_dir.clone(),
        };
        if let Err(returned) = handle.assign(assignment) {
            error!("session: worker {id} refused {}", returned.entry.name);
            self.backlog.push_front(returned.entry);
            if let Some(handle) = self.workers.remove(&id) {
                handle.abort();
            }
        }
    }

    fn publish(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.sink.send_replace(SessionProgress {
            completed_bytes: self.completed_bytes,
            total_bytes: self.total_bytes,
        });
    }

    fn finish(&mut self, state: SessionState) -> SessionOutcome {
        self.state = state;
        SessionOutcome {
            state: self.state,
            completed_bytes: self.completed_bytes,
            total_bytes: self.total_bytes,
            units_completed: self.units_completed,
            units_failed: self.units_failed,
            units_unassigned: self.backlog.len(),
        }
    }
}
