//! Background expiry sweeper.
//!
//! Runs [`ListingLifecycle::expire_sweep`] on a dedicated thread every
//! `interval` until the returned handle is shut down.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::services::{ListingLifecycle, SweepReport};
use crate::store::UnitOfWork;

/// Totals across every sweep run by one sweeper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStats {
    pub runs: u64,
    pub renewed: u64,
    pub expired: u64,
    pub failed: u64,
    /// Sweeps that could not list the due listings at all.
    pub aborted_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl SweeperStats {
    fn record(&mut self, at: DateTime<Utc>, report: &SweepReport) {
        self.runs += 1;
        self.renewed += report.renewed.len() as u64;
        self.expired += report.expired.len() as u64;
        self.failed += report.failed.len() as u64;
        self.last_run = Some(at);
    }
}

pub struct ExpirySweeper<S> {
    listings: ListingLifecycle<S>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl<S: UnitOfWork + 'static> ExpirySweeper<S> {
    pub fn new(listings: ListingLifecycle<S>) -> Self {
        Self {
            listings,
            stats: Arc::new(Mutex::new(SweeperStats::default())),
        }
    }

    /// Sweep once at the service clock's current time.
    pub fn run_once(&self) -> Result<SweepReport, ServiceError> {
        let now = self.listings.context().now();
        match self.listings.expire_sweep(now) {
            Ok(report) => {
                lock(&self.stats).record(now, &report);
                Ok(report)
            }
            Err(err) => {
                lock(&self.stats).aborted_runs += 1;
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> SweeperStats {
        lock(&self.stats).clone()
    }

    /// Run the sweep every `interval` on a background thread.
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn(self, interval: Duration) -> io::Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name("expiry-sweeper".to_string())
            .spawn(move || sweep_loop(self, interval, shutdown_rx))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

/// Handle to a running sweeper thread.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its thread. A sweep already in progress
    /// finishes first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("expiry sweeper thread panicked");
            }
        }
    }

    pub fn stats(&self) -> SweeperStats {
        lock(&self.stats).clone()
    }
}

fn sweep_loop<S: UnitOfWork + 'static>(
    sweeper: ExpirySweeper<S>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(interval_secs = interval.as_secs_f64(), "expiry sweeper started");

    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if let Err(err) = sweeper.run_once() {
                    error!(error = %err, "expiry sweep aborted");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(runs = sweeper.stats().runs, "expiry sweeper stopped");
}

fn lock(stats: &Mutex<SweeperStats>) -> std::sync::MutexGuard<'_, SweeperStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}
