//! The refresh scheduler: watches the needs-refresh cell and runs one
//! compile task at a time, killing the previous one.
//!
//! Refresh coalesces bursts of edits: however many signals arrive while a
//! pass runs, the scheduler takes one merged signal, and only the latest
//! non-null priority survives. In-flight work is preemptively abandoned
//! rather than queued; everything a task committed per-file is durable, so
//! throwing the tail away is safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lsp_types::Url;
use parking_lot::{Condvar, Mutex};

use skein_compile::Frontend;

use crate::compile::CompilePass;
use crate::worker::Shared;

/// The needs-refresh cell: at most one pending, coalesced signal.
#[derive(Default)]
pub(crate) struct Trigger {
    cell: Mutex<TriggerCell>,
    cond: Condvar,
}

#[derive(Default)]
struct TriggerCell {
    /// A pending signal, with its optional priority URI.
    signal: Option<Option<Url>>,
    /// Compile passes between take and completion.
    active: usize,
    shutdown: bool,
}

impl Trigger {
    /// Posts a refresh signal. Bursts coalesce; the latest non-null
    /// priority survives.
    pub fn signal(&self, priority: Option<Url>) {
        let mut cell = self.cell.lock();
        let prior = cell.signal.take().flatten();
        cell.signal = Some(priority.or(prior));
        self.cond.notify_all();
    }

    /// Blocks until a signal is posted, takes it, and accounts for the
    /// pass about to start. Returns `None` on shutdown.
    pub fn take(&self) -> Option<Option<Url>> {
        let mut cell = self.cell.lock();
        loop {
            if cell.shutdown {
                return None;
            }
            if let Some(signal) = cell.signal.take() {
                cell.active += 1;
                self.cond.notify_all();
                return Some(signal);
            }
            self.cond.wait(&mut cell);
        }
    }

    /// Marks one pass as over, however it ended.
    pub fn pass_finished(&self) {
        let mut cell = self.cell.lock();
        cell.active = cell.active.saturating_sub(1);
        self.cond.notify_all();
    }

    /// Asks the refresh loop to exit.
    pub fn shutdown(&self) {
        self.cell.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Blocks until no signal is pending and no pass is running.
    pub fn quiesce(&self) {
        let mut cell = self.cell.lock();
        while !cell.shutdown && (cell.signal.is_some() || cell.active > 0) {
            self.cond.wait(&mut cell);
        }
    }
}

/// Handle on a spawned compile task.
struct CompileTask {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl CompileTask {
    fn spawn<F: Frontend>(shared: Arc<Shared<F>>, priority: Option<Url>) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread = std::thread::Builder::new()
            .name("skein-compile".to_owned())
            .spawn({
                let cancel = cancel.clone();
                move || {
                    // The guard settles the active-pass count even if the
                    // task panics; the panic stays on this thread and the
                    // next trigger starts over.
                    let _guard = PassGuard(shared.clone());
                    CompilePass::new(shared, priority, cancel).run();
                }
            })
            .expect("failed to spawn skein-compile");
        Self { cancel, thread }
    }

    /// Cancels the task and waits for it to reach a safe point and exit.
    fn kill(self) {
        self.cancel.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            log::error!("RefreshActor: compile task panicked; recovering on the next pass");
        }
    }
}

struct PassGuard<F: Frontend>(Arc<Shared<F>>);

impl<F: Frontend> Drop for PassGuard<F> {
    fn drop(&mut self) {
        self.0.trigger.pass_finished();
    }
}

/// Body of the `skein-refresh` thread.
pub(crate) fn refresh_loop<F: Frontend>(shared: Arc<Shared<F>>) {
    log::debug!("RefreshActor: initialized");
    let mut running: Option<CompileTask> = None;
    while let Some(priority) = shared.trigger.take() {
        if let Some(prev) = running.take() {
            prev.kill();
        }
        log::debug!("RefreshActor: starting a pass, priority {priority:?}");
        running = Some(CompileTask::spawn(shared.clone(), priority));
    }
    if let Some(prev) = running.take() {
        prev.kill();
    }
    log::debug!("RefreshActor: exited");
}
