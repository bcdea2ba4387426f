/// Background purge of expired records
///
/// Runs `purge_expired` on a worker thread at a fixed interval so
/// soft-expired relational rows do not accumulate forever. Purging never
/// changes what callers observe; claims reclaim expired rows regardless.

use crate::backend::StorageBackend;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Granularity at which the worker notices a shutdown request
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Background worker that periodically purges expired records
pub struct ExpirySweeper {
    /// Worker thread handle
    handle: Option<JoinHandle<()>>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// Records purged since start
    purged: Arc<AtomicU64>,

    backend: Arc<dyn StorageBackend>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper; call [`start`](Self::start) to launch the thread.
    pub fn new(backend: Arc<dyn StorageBackend>, interval: Duration) -> Self {
        Self {
            handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            purged: Arc::new(AtomicU64::new(0)),
            backend,
            interval,
        }
    }

    /// Start the background thread
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("Expiry sweeper already running");
            return;
        }

        let shutdown = Arc::clone(&self.shutdown);
        let purged = Arc::clone(&self.purged);
        let backend = Arc::clone(&self.backend);
        let interval = self.interval;

        info!(
            backend = backend.kind(),
            interval_ms = interval.as_millis() as u64,
            "Starting expiry sweeper"
        );

        let handle = thread::spawn(move || {
            Self::worker_loop(shutdown, purged, backend, interval);
        });

        self.handle = Some(handle);
    }

    fn worker_loop(
        shutdown: Arc<AtomicBool>,
        purged: Arc<AtomicU64>,
        backend: Arc<dyn StorageBackend>,
        interval: Duration,
    ) {
        debug!("Expiry sweeper loop started");

        let mut next_run = Instant::now() + interval;
        while !shutdown.load(Ordering::Relaxed) {
            if Instant::now() < next_run {
                thread::sleep(SHUTDOWN_POLL.min(interval));
                continue;
            }
            next_run = Instant::now() + interval;

            match backend.purge_expired() {
                Ok(0) => {}
                Ok(n) => {
                    purged.fetch_add(n, Ordering::Relaxed);
                    debug!(purged = n, "Purged expired records");
                }
                Err(e) => warn!(error = %e, "Expired record purge failed"),
            }
        }

        info!("Expiry sweeper loop exited");
    }

    /// Total records purged by this sweeper
    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread to stop and wait for it.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            debug!("Waiting for expiry sweeper thread to exit");
            if let Err(e) = handle.join() {
                warn!("Error joining expiry sweeper thread: {:?}", e);
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
