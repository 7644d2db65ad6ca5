//! Hooks around every dispatch.
//!
//! Observers see the start and the end of each send, query and publish.
//! They are side channels: nothing they do changes the dispatch result.

use crate::error::DispatchError;
use crate::message::MessageKind;
use std::time::Duration;

/// Identifies one dispatch to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEvent {
    /// What kind of dispatch this is
    pub kind: MessageKind,
    /// The message type name
    pub message: &'static str,
}

impl DispatchEvent {
    /// Describe a dispatch.
    #[must_use]
    pub const fn new(kind: MessageKind, message: &'static str) -> Self {
        Self { kind, message }
    }
}

/// Receives dispatch lifecycle callbacks.
///
/// Every method defaults to a no-op. Callbacks run inline on the
/// dispatching task and must not block.
pub trait DispatchObserver: Send + Sync + 'static {
    /// A dispatch is about to run.
    fn on_start(&self, event: &DispatchEvent) {
        let _ = event;
    }

    /// A dispatch completed.
    fn on_success(&self, event: &DispatchEvent, elapsed: Duration) {
        let _ = (event, elapsed);
    }

    /// A dispatch failed or was cancelled.
    fn on_failure(&self, event: &DispatchEvent, error: &DispatchError, elapsed: Duration) {
        let _ = (event, error, elapsed);
    }
}
