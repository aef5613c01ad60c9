//! Asynchronous delivery of pin violation reports.
//!
//! [`ViolationReporter::report`] only enqueues: a single background worker
//! drains the queue and fans each report out to every subscribed
//! [`ViolationObserver`], in the order the reports were enqueued. Observers
//! never run on the thread performing the TLS handshake.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};

use crate::error::{Error, ReportError};
use crate::types::report::ViolationReport;

/// Receives violation reports on the reporter's worker thread.
///
/// An `Err` or a panic is logged and does not affect other observers.
pub trait ViolationObserver: Send + Sync {
    fn on_violation(&self, report: &ViolationReport) -> Result<(), ReportError>;
}

/// Handle returned by [`ViolationReporter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Registry = Arc<Vec<(SubscriptionId, Arc<dyn ViolationObserver>)>>;

enum Command {
    Report(Box<ViolationReport>),
    Flush(Sender<()>),
}

pub struct ViolationReporter {
    observers: Arc<RwLock<Registry>>,
    next_id: AtomicU64,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl fmt::Debug for ViolationReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViolationReporter")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl ViolationReporter {
    /// Start a reporter and its worker thread.
    pub fn new() -> Result<Self, Error> {
        let observers: Arc<RwLock<Registry>> = Arc::default();
        let (sender, receiver) = mpsc::channel();

        let worker_observers = Arc::clone(&observers);
        let worker = thread::Builder::new()
            .name("tlspin-reporter".to_string())
            .spawn(move || run(receiver, worker_observers))?;

        Ok(Self {
            observers,
            next_id: AtomicU64::new(1),
            sender: Some(sender),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    pub fn subscribe(&self, observer: impl ViolationObserver + 'static) -> SubscriptionId {
        self.subscribe_arc(Arc::new(observer))
    }

    /// Subscribe an observer that is also held elsewhere.
    pub fn subscribe_arc(&self, observer: Arc<dyn ViolationObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(registry.len() + 1);
        next.extend(registry.iter().cloned());
        next.push((id, observer));
        *registry = Arc::new(next);
        id
    }

    /// Remove an observer. Returns `false` if `id` was not subscribed.
    ///
    /// A report already being fanned out may still reach the observer.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        if !registry.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = registry
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *registry = Arc::new(next);
        true
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Enqueue a report for delivery and return immediately.
    pub fn report(&self, report: ViolationReport) {
        let delivered = self
            .sender
            .as_ref()
            .map_or(false, |tx| tx.send(Command::Report(Box::new(report))).is_ok());
        if !delivered {
            warn!("Violation reporter worker is gone, dropping report");
        }
    }

    /// Block until every report enqueued before this call has been handed
    /// to all observers.
    ///
    /// Returns immediately when called from an observer.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel();
        let queued = self
            .sender
            .as_ref()
            .map_or(false, |tx| tx.send(Command::Flush(done_tx)).is_ok());
        if queued {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for ViolationReporter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if thread::current().id() == self.worker_id {
                return;
            }
            if worker.join().is_err() {
                warn!("Violation reporter worker panicked");
            }
        }
    }
}

fn run(receiver: Receiver<Command>, observers: Arc<RwLock<Registry>>) {
    for command in receiver {
        match command {
            Command::Report(report) => deliver(&observers, &report),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Violation reporter worker stopped");
}

fn deliver(observers: &RwLock<Registry>, report: &ViolationReport) {
    let snapshot: Registry = observers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for (id, observer) in snapshot.iter() {
        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_violation(report))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                subscription = id.0,
                host = %report.hostname,
                error = %e,
                "Violation observer failed"
            ),
            Err(_) => warn!(
                subscription = id.0,
                host = %report.hostname,
                "Violation observer panicked"
            ),
        }
    }
}
