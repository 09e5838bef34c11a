use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::decision;
use crate::engine::models::{Assignment, TransferUnit, WorkerEvent};
use crate::engine::transfer;
use crate::networking::NetworkClient;

/// Settings shared by every worker of one session.
pub struct WorkerContext {
    pub network: NetworkClient,
    pub full_scan: bool,
    /// Checked by blocking checksum and extraction jobs, which outlive an
    /// aborted worker task.
    pub cancel: CancellationToken,
}

/// Sends one worker's events to the controller, tagged with the worker id.
#[derive(Clone)]
pub struct EventReporter {
    id: usize,
    tx: mpsc::UnboundedSender<(usize, WorkerEvent)>,
}

impl EventReporter {
    pub fn new(id: usize, tx: mpsc::UnboundedSender<(usize, WorkerEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn diagnostic(&self, text: impl Into<String>) {
        self.send(WorkerEvent::Diagnostic(text.into()));
    }

    /// Credit `bytes` against `unit`; only the capped amount is reported.
    pub fn progress(&self, unit: &mut TransferUnit, bytes: u64) {
        let granted = unit.credit(bytes);
        if granted > 0 {
            self.send(WorkerEvent::Progress(granted));
        }
    }

    pub fn complete(&self, bytes: u64) {
        self.send(WorkerEvent::UnitComplete(bytes));
    }

    pub fn fail(&self, err: impl std::fmt::Display) {
        self.send(WorkerEvent::Diagnostic(format!("err: {err}")));
        self.send(WorkerEvent::UnitFailed);
    }

    fn send(&self, event: WorkerEvent) {
        // The controller is gone once the session ends; late events are dropped.
        let _ = self.tx.send((self.id, event));
    }
}

pub struct WorkerHandle {
    id: usize,
    assignments: mpsc::Sender<Assignment>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Hand the next unit to an idle worker.
    pub fn assign(&self, assignment: Assignment) -> Result<(), Assignment> {
        self.assignments
            .try_send(assignment)
            .map_err(|err| err.into_inner())
    }

    /// Let the worker finish its loop; it holds no unit at this point.
    pub fn retire(self) {
        debug!("worker {}: retiring", self.id);
        drop(self.assignments);
    }

    /// Stop the worker immediately, abandoning any in-flight transfer.
    pub fn abort(&self) {
        self.task.abort();
    }
}

pub fn spawn_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    events: mpsc::UnboundedSender<(usize, WorkerEvent)>,
) -> WorkerHandle {
    let (assignments, mut inbox) = mpsc::channel::<Assignment>(1);
    let reporter = EventReporter::new(id, events);
    let task = tokio::spawn(async move {
        while let Some(assignment) = inbox.recv().await {
            process(assignment, &ctx, &reporter).await;
        }
        debug!("worker {id}: no more assignments");
    });
    WorkerHandle {
        id,
        assignments,
        task,
    }
}

/// Decide, transfer, then close the unit with exactly one `UnitComplete`
/// or `UnitFailed`.
async fn process(assignment: Assignment, ctx: &WorkerContext, reporter: &EventReporter) {
    let Assignment {
        entry,
        source_dir,
        dest_dir,
    } = assignment;
    let name = entry.name.clone();
    let full_scan = ctx.full_scan;

    let decision = {
        let entry = entry.clone();
        let source_dir = source_dir.clone();
        let dest_dir = dest_dir.clone();
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || {
            decision::decide(&entry, &source_dir, &dest_dir, full_scan, &cancel)
        })
        .await
    };
    let decision = match decision {
        Ok(decision) => decision,
        Err(err) => {
            warn!("worker: decision for {name} failed: {err}");
            reporter.fail(format!("{name}: {err}"));
            return;
        }
    };
    reporter.diagnostic(decision.reason);

    let mut unit = TransferUnit::new(entry, decision.src, decision.dst, decision.action);
    match transfer::execute(&mut unit, &dest_dir, &ctx.network, reporter, &ctx.cancel).await {
        Ok(()) => {
            reporter.diagnostic(format!("complete: {name}"));
            reporter.complete(unit.true_up());
        }
        Err(err) => {
            warn!("worker: {name} failed after {} bytes: {err}", unit.credited());
            reporter.fail(format!("{name}: {err}"));
        }
    }
}
