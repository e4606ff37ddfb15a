use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use anyhow::Context as _;
use parking_lot::Mutex;

/// A unit of privileged work bound to the owner thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The single privileged worker shared by every context in the process.
///
/// Jobs are consumed from an unbounded FIFO, so submission order is execution
/// order, both across contexts and within one context. Each job runs under
/// `catch_unwind`: a faulting job resolves only its own completion and the
/// queue keeps draining.
///
/// There is deliberately no global instance; the application spawns one and
/// passes the `Arc` to each context constructor.
pub struct OwnerThread {
    tx: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OwnerThread {
    /// Spawns the worker thread.
    pub fn spawn() -> anyhow::Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel::<Job>();

        let worker = std::thread::Builder::new()
            .name("litho-owner".to_string())
            .spawn(move || {
                for job in rx {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("owner-thread job panicked; queue continues");
                    }
                }
                log::debug!("owner thread drained and exiting");
            })
            .context("failed to spawn owner thread")?;

        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Enqueues a job in FIFO order.
    ///
    /// Returns false when the worker has shut down; the rejected job is
    /// dropped, which fires the fallback of any completion it owns.
    pub fn dispatch(&self, job: Job) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Stops accepting work, drains the queue, and joins the worker.
    ///
    /// Must not be called from the owner thread itself.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            log::error!("owner thread terminated abnormally");
        }
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
