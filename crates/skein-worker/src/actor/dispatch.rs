//! The request dispatcher: executes ready requests in id order.
//!
//! Popping the smallest id gives a deterministic fairness property. The
//! state may have moved between enqueue and dequeue, so every pop is
//! re-checked against a fresh snapshot; a request that went stale returns
//! to pending, sinks always run outside every lock.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use skein_compile::Frontend;

use crate::requests::{try_satisfy, RequestError, RequestQueues, Satisfaction};
use crate::worker::Shared;

/// The request queues plus the condition the dispatcher sleeps on.
pub(crate) struct RequestStore<F: Frontend> {
    pub queues: Mutex<RequestQueues<F>>,
    pub cond: Condvar,
}

impl<F: Frontend> Default for RequestStore<F> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(RequestQueues::default()),
            cond: Condvar::new(),
        }
    }
}

impl<F: Frontend> RequestStore<F> {
    /// Wakes the dispatcher and anyone settling.
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Asks the dispatch loop to exit.
    pub fn shutdown(&self) {
        self.queues.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Blocks until the ready queue is drained and nothing is executing.
    pub fn quiesce(&self) {
        let mut queues = self.queues.lock();
        while !queues.shutdown && (queues.has_ready() || queues.executing) {
            self.cond.wait(&mut queues);
        }
    }
}

/// Body of the `skein-dispatch` thread.
pub(crate) fn dispatch_loop<F: Frontend>(shared: Arc<Shared<F>>) {
    log::debug!("DispatchActor: initialized");
    loop {
        let (id, req) = {
            let mut queues = shared.requests.queues.lock();
            loop {
                if queues.shutdown {
                    log::debug!("DispatchActor: exited");
                    return;
                }
                if let Some(popped) = queues.pop_ready() {
                    queues.executing = true;
                    break popped;
                }
                shared.requests.cond.wait(&mut queues);
            }
        };

        let view = shared.file_view(&req.target);
        match try_satisfy(req.kind.stage(), &view) {
            Satisfaction::Ready(fulfilment) => {
                log::debug!("DispatchActor: dispatching {id}");
                req.deliver(fulfilment);
            }
            Satisfaction::NotYet => {
                log::debug!("DispatchActor: {id} went stale, back to pending");
                shared.requests.queues.lock().insert_pending(id, req);
            }
            Satisfaction::Closed => {
                log::debug!("DispatchActor: {id} targets a closed file");
                req.fail(RequestError::FileNotOpen);
            }
        }

        let mut queues = shared.requests.queues.lock();
        queues.executing = false;
        shared.requests.cond.notify_all();
    }
}
