//! The staleness sweeper (§2 item 11, §4.7): a background task that
//! periodically reclaims iterators abandoned by a misbehaving or crashed
//! guest, driven by an external ticker rather than anything internal to the
//! dispatch core.

use std::sync::Arc;
use std::time::Duration;

use hostapi_core::CapabilitySet;

/// A handle to a running sweep task. Dropping it does not stop the sweep —
/// call [`SweepHandle::stop`] (or abort the handle directly) to shut it
/// down; this mirrors `tokio::task::JoinHandle`'s own "detached by default"
/// semantics.
pub struct SweepHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Spawn a task that calls [`CapabilitySet::cleanup_stale_iterators`] on a
/// fixed interval for the lifetime of the returned handle (or until the set
/// itself is dropped).
pub fn spawn(set: Arc<CapabilitySet>, interval: Duration) -> SweepHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reclaimed = set.cleanup_stale_iterators().await;
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "staleness sweep reclaimed idle iterators");
            }
        }
    });
    SweepHandle { task }
}
