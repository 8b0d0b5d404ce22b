//! Cooperative cancellation, deadlines, and the per-call context threaded
//! explicitly through every dispatch entry point.
//!
//! §9 flags "ambient context threading" (a thread-local bag carrying both the
//! capability set handle and caller identity) as a pattern to re-architect.
//! This module is that re-architecture: a small, explicit [`CallContext`]
//! struct passed as a parameter, not looked up from a thread-local.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ids::ServiceIdentity;

/// A shareable cancellation flag. `cancel()` returns `true` only on the call
/// that flips it, so callers can tell "I triggered this" from "already
/// cancelled by someone else" without a second check.
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `true` if this call transitioned the flag from uncancelled to
    /// cancelled; `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Share the same underlying flag with a derived context.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// An optional absolute deadline, measured against [`Instant`] so it survives
/// being passed across an await point without drifting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

/// Everything a single guest→host call needs, passed explicitly rather than
/// recovered from ambient state: the caller's identity, a deadline, and a
/// cancellation token capabilities and iterators are expected to observe
/// cooperatively (§5).
#[derive(Clone, Debug)]
pub struct CallContext {
    caller: ServiceIdentity,
    deadline: Deadline,
    cancellation: Cancellation,
}

impl CallContext {
    pub fn new(caller: ServiceIdentity) -> Self {
        Self {
            caller,
            deadline: Deadline::none(),
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn caller(&self) -> &ServiceIdentity {
        &self.caller
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn child(&self) -> Self {
        Self {
            caller: self.caller.clone(),
            deadline: self.deadline,
            cancellation: self.cancellation.child(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reports_first_transition_only() {
        let token = Cancellation::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn deadline_none_never_expires() {
        assert!(!Deadline::none().is_expired());
    }

    #[test]
    fn deadline_in_the_past_is_expired() {
        let deadline = Deadline::at(Instant::now() - Duration::from_secs(1));
        assert!(deadline.is_expired());
    }
}
