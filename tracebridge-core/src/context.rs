//! # Call Context
//!
//! The explicit execution context of one logical call. It is created at an inbound
//! boundary (or with [`CallContext::background`] for calls that have none), handed to
//! business handlers, and passed to the [`crate::client::BridgeClient`] for every
//! downstream call so the trace id and deadline flow forward.
use crate::trace;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    trace_id: String,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            deadline: None,
        }
    }

    /// A context with a freshly generated trace id and no deadline.
    pub fn background() -> Self {
        Self::new(trace::generate())
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Bounds the context by `timeout` from now.
    ///
    /// A timeout too large to represent as an instant leaves the context unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, bounded by `limit`.
    ///
    /// Returns `Duration::ZERO` once the deadline has passed.
    pub fn remaining(&self, limit: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(limit),
            None => limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_has_a_trace_id() {
        let ctx = CallContext::background();
        assert_eq!(ctx.trace_id().len(), 32);
        assert_eq!(ctx.deadline(), None);
    }

    #[tokio::test]
    async fn test_remaining_is_bounded_by_limit_and_deadline() {
        let limit = Duration::from_millis(1500);

        let ctx = CallContext::new("t1");
        assert_eq!(ctx.remaining(limit), limit);

        let ctx = CallContext::new("t1").with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.remaining(limit), limit);

        let ctx = CallContext::new("t1").with_timeout(Duration::from_millis(100));
        assert!(ctx.remaining(limit) <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_deadlines_only_shrink() {
        let ctx = CallContext::new("t1")
            .with_timeout(Duration::from_millis(100))
            .with_timeout(Duration::from_secs(60));

        assert!(ctx.remaining(Duration::from_secs(10)) <= Duration::from_millis(100));
    }

    #[test]
    fn test_unrepresentable_timeout_keeps_context_unbounded() {
        let ctx = CallContext::new("t1").with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);

        let bounded = CallContext::new("t1")
            .with_timeout(Duration::from_millis(100))
            .with_timeout(Duration::MAX);
        assert!(bounded.remaining(Duration::from_secs(10)) <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_expired_deadline_leaves_nothing() {
        let ctx = CallContext::new("t1").with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.remaining(Duration::from_secs(1)), Duration::ZERO);
    }
}
