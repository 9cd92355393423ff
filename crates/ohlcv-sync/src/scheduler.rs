//! Recurring job registration.

use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// A repeatable unit of work. Each call produces a fresh future.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Anything that can run a job at a fixed period.
pub trait JobScheduler: Send + Sync {
    fn every(&self, name: &str, period: Duration, job: Job);
}

/// Scheduler backed by tokio interval tasks.
///
/// Jobs first fire one full period after registration. A run that overlaps
/// the next tick delays it rather than stacking up missed ticks.
#[derive(Default)]
pub struct TokioScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Abort every registered job.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Scheduler stopped");
    }
}

impl JobScheduler for TokioScheduler {
    fn every(&self, name: &str, period: Duration, job: Job) {
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                debug!(job = %name, "Running scheduled job");
                job().await;
            }
        });

        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let handles = self.handles.get_mut().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}
