//! Renewal scheduling: injectable clock and jitter, one-shot triggers and
//! the background task scheduler.

use std::time::{Duration, SystemTime};

#[cfg(feature = "runtime-tokio")]
use std::sync::Mutex;

use rand::RngExt as _;

/// Source of the current time. Injectable to make tests deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> SystemTime + Send + Sync,
{
    fn now(&self) -> SystemTime {
        self()
    }
}

/// Source of the randomized renewal offset.
///
/// Jitter spreads renewals across a fleet so that leases issued together are
/// not all renewed in the same instant.
pub trait JitterSource: Send + Sync {
    /// Draw an offset for the given expiry threshold.
    fn jitter(&self, threshold: Duration) -> Duration;
}

impl<F> JitterSource for F
where
    F: Fn(Duration) -> Duration + Send + Sync,
{
    fn jitter(&self, threshold: Duration) -> Duration {
        self(threshold)
    }
}

/// Uniform draw from `[1 s, threshold)`. Thresholds of one second or less
/// yield no jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, threshold: Duration) -> Duration {
        let threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        if threshold_ms <= 1_000 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(1_000..threshold_ms))
    }
}

/// No jitter. Renewals fire exactly `threshold` before expiry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&self, _threshold: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Delay before renewing a lease that expires in `remaining`.
///
/// `max(0, remaining − threshold + jitter)`, where the jitter term is drawn
/// only when `remaining > 2 × threshold`. The result never exceeds
/// `remaining`.
pub(crate) fn renewal_delay(
    remaining: Duration,
    threshold: Duration,
    jitter: &dyn JitterSource,
) -> Duration {
    let jitter = if remaining > threshold * 2 {
        jitter.jitter(threshold)
    } else {
        Duration::ZERO
    };
    (remaining + jitter).saturating_sub(threshold)
}

/// One-shot provider of the next fire delay: yields the configured delay
/// once, then `None`.
#[cfg(feature = "runtime-tokio")]
#[derive(Debug)]
pub struct OneShotTrigger {
    delay: Mutex<Option<Duration>>,
}

#[cfg(feature = "runtime-tokio")]
impl OneShotTrigger {
    #[must_use]
    pub fn after(delay: Duration) -> Self {
        Self {
            delay: Mutex::new(Some(delay)),
        }
    }

    /// The delay until the next firing, or `None` once fired.
    pub fn next_fire(&self) -> Option<Duration> {
        self.delay.lock().expect("Non-poisoned lock").take()
    }
}

/// Handle to a scheduled task. Cancelling is race-free for the owners in this
/// crate: every firing re-checks its owner's generation stamp before doing
/// work, so a cancelled-but-already-fired task returns without effect.
#[cfg(feature = "runtime-tokio")]
#[derive(Debug)]
pub struct ScheduledTask {
    handle: tokio::task::JoinHandle<()>,
}

#[cfg(feature = "runtime-tokio")]
impl ScheduledTask {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns scheduled tasks onto the ambient tokio runtime.
#[cfg(feature = "runtime-tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskScheduler;

#[cfg(feature = "runtime-tokio")]
impl TaskScheduler {
    /// Run `task` whenever `trigger` yields a delay. A [`OneShotTrigger`]
    /// runs it exactly once; rescheduling is the task's own business.
    pub fn schedule<F, Fut>(&self, trigger: OneShotTrigger, task: F) -> ScheduledTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            while let Some(delay) = trigger.next_fire() {
                tokio::time::sleep(delay).await;
                task().await;
            }
        });
        ScheduledTask { handle }
    }
}
