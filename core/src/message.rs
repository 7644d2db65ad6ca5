//! Message traits: the values callers hand to the mediator.
//!
//! Every dispatchable value implements [`Message`]. Requests (commands and
//! queries) additionally implement [`Request`] and are routed to exactly one
//! handler; notifications implement [`Notification`] and fan out to every
//! compatible handler.
//!
//! A message declares its place in the type hierarchy through
//! [`Message::describe`]. Rust has no inheritance, so base types are reached
//! through a field projection and interfaces through an unsizing coercion:
//!
//! ```ignore
//! impl Message for OrderShipped {
//!     fn describe(lattice: &mut LatticeBuilder<Self>) {
//!         lattice
//!             .extends::<OrderEvent>(|shipped| &shipped.event)
//!             .implements::<dyn Trackable>(as_trackable);
//!     }
//! }
//!
//! fn as_trackable(shipped: &OrderShipped) -> &(dyn Trackable + 'static) {
//!     shipped
//! }
//! ```

use crate::lattice::LatticeBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value that can travel through the mediator.
///
/// Messages are immutable once created. Requests are moved into the pipeline
/// for the duration of one dispatch; notifications are borrowed read-only by
/// every matched handler for the duration of one publish.
pub trait Message: Send + Sync + 'static {
    /// Declare the base types and interfaces of this message.
    ///
    /// The default declares nothing: the message only matches handlers and
    /// middleware registered for its exact type.
    fn describe(lattice: &mut LatticeBuilder<Self>)
    where
        Self: Sized,
    {
        let _ = lattice;
    }
}

/// A command or query routed to exactly one handler.
pub trait Request: Message {
    /// The value produced by the handler.
    ///
    /// Commands without a result use `()`.
    type Response: Send + 'static;

    /// Whether this request is a command or a query.
    ///
    /// Queries must produce a value; a query handler completing without one
    /// fails the dispatch with
    /// [`DispatchError::ResultRequired`](crate::error::DispatchError::ResultRequired).
    const KIND: RequestKind = RequestKind::Command;
}

/// A domain event delivered to zero or more handlers.
pub trait Notification: Message {}

/// The shape of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Mutating request; the handler may complete without a result.
    Command,
    /// Reading request; the handler must produce a result.
    Query,
}

impl RequestKind {
    /// Whether a handler for this kind must produce a value.
    #[must_use]
    pub const fn requires_result(self) -> bool {
        matches!(self, Self::Query)
    }
}

/// Every kind of dispatch the mediator performs.
///
/// Used by observers and the statistics tracker to label a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A command sent through `send`/`dispatch`
    Command,
    /// A query sent through `query`/`dispatch`
    Query,
    /// A notification published to its subscribers
    Notification,
}

impl From<RequestKind> for MessageKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Command => Self::Command,
            RequestKind::Query => Self::Query,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Query => write!(f, "query"),
            Self::Notification => write!(f, "notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl Message for Ping {}
    impl Request for Ping {
        type Response = ();
    }

    struct Lookup;
    impl Message for Lookup {}
    impl Request for Lookup {
        type Response = u32;
        const KIND: RequestKind = RequestKind::Query;
    }

    #[test]
    fn test_request_kind_defaults_to_command() {
        assert_eq!(Ping::KIND, RequestKind::Command);
        assert!(!Ping::KIND.requires_result());
        assert!(Lookup::KIND.requires_result());
    }

    #[test]
    fn test_message_kind_from_request_kind() {
        assert_eq!(MessageKind::from(RequestKind::Query), MessageKind::Query);
        assert_eq!(MessageKind::Notification.to_string(), "notification");
    }
}
