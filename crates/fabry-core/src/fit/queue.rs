//! Single-worker FIFO for numerical fits.
//!
//! Fit requests are boxed closures drained in submission order by one named
//! thread, so no two fits ever run concurrently through the queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::{FabryError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct FitterQueue {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl FitterQueue {
    /// Spawn the worker thread.
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("fabry-fitter".into())
            .spawn(move || {
                for job in rx {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Fit job panicked; continuing with the next request");
                    }
                }
                debug!("Fitter queue drained");
            })?;
        Ok(Self {
            sender: Some(tx),
            worker: Some(worker),
        })
    }

    /// Enqueue `job`. The returned ticket yields its result once the worker reaches it.
    pub fn submit<T, F>(&self, label: &str, job: F) -> Result<FitTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: Job = Box::new(move || {
            let _ = tx.send(job());
        });
        self.sender
            .as_ref()
            .ok_or_else(|| closed(label))?
            .send(boxed)
            .map_err(|_| closed(label))?;
        Ok(FitTicket {
            receiver: rx,
            label: label.to_string(),
        })
    }
}

impl Drop for FitterQueue {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn closed(label: &str) -> FabryError {
    FabryError::StageFailed {
        stage: label.to_string(),
        reason: "fitter queue is closed".into(),
    }
}

/// Pending result of a queued fit.
pub struct FitTicket<T> {
    receiver: mpsc::Receiver<T>,
    label: String,
}

impl<T> FitTicket<T> {
    /// Block until the fit has run.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().map_err(|_| FabryError::StageFailed {
            stage: self.label,
            reason: "fit job did not produce a result".into(),
        })
    }
}
