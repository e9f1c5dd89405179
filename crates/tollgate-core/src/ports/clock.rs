use std::sync::atomic::{AtomicU64, Ordering};

/// Wall clock in whole epoch seconds.
///
/// Bucket timestamps are shared between gateway instances, so they come from
/// wall time rather than a process-local monotonic clock.
pub trait Clock: Send + Sync {
    fn now_epoch_secs(&self) -> u64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(epoch_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(epoch_secs),
        }
    }

    pub fn set(&self, epoch_secs: u64) {
        self.secs.store(epoch_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}
