use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::Time;

pub trait Clock: core::fmt::Debug + Send + Sync {
    fn now(&self) -> Time;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> Time {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        duration_to_time(since_epoch)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}
impl ManualClock {
    pub fn new(start: Time) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, time: Time) {
        self.now.store(time, Ordering::SeqCst);
    }
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_to_time(by), Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Time {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn duration_to_time(duration: Duration) -> Time {
    u64::try_from(duration.as_millis()).unwrap_or(Time::MAX)
}
