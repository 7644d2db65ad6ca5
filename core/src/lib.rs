//! # Switchyard Core
//!
//! Core traits and types for the Switchyard mediator.
//!
//! This crate defines the contracts shared by the runtime and by
//! applications: what a message is, how it declares its place in a type
//! hierarchy, what handlers and middleware look like, and how dispatch fails.
//! It contains no dispatch logic; see `switchyard-runtime` for that.
//!
//! ## Core Concepts
//!
//! - **Request**: A command or query routed to exactly one handler
//! - **Notification**: An event fanned out to every compatible handler
//! - **Type lattice**: The concrete type, base types and interfaces a
//!   message can be viewed as, declared once at registration
//! - **Middleware**: Ordered stages wrapped around a handler invocation
//! - **Resolver**: The resolve-by-type capability components are built from
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_core::prelude::*;
//!
//! struct GetBalance {
//!     account: AccountId,
//! }
//!
//! impl Message for GetBalance {}
//!
//! impl Request for GetBalance {
//!     type Response = u64;
//!     const KIND: RequestKind = RequestKind::Query;
//! }
//!
//! struct GetBalanceHandler;
//!
//! impl RequestHandler<GetBalance> for GetBalanceHandler {
//!     fn handle<'a>(
//!         &'a self,
//!         request: GetBalance,
//!         ctx: &'a DispatchContext,
//!     ) -> BoxFuture<'a, Reply<u64>> {
//!         Box::pin(async move {
//!             let ledger = ctx.resolve::<Ledger>().map_err(DispatchError::handler)?;
//!             Ok(Some(ledger.balance(request.account)))
//!         })
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;

pub mod context;
pub mod error;
pub mod handler;
pub mod lattice;
pub mod message;
pub mod observer;
pub mod pipeline;
pub mod publish;
pub mod resolver;

/// Environment module - injected collaborators
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// The wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Everything needed to write messages, handlers and middleware.
pub mod prelude {
    pub use crate::context::DispatchContext;
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::error::{ConstructionError, DispatchError, HandlerError};
    pub use crate::handler::{handler_fn, NotificationHandler, Reply, RequestHandler};
    pub use crate::lattice::{LatticeBuilder, TypeKey, TypeLattice};
    pub use crate::message::{Message, MessageKind, Notification, Request, RequestKind};
    pub use crate::observer::{DispatchEvent, DispatchObserver};
    pub use crate::pipeline::{
        AnyReply, AnyRequest, ErasedNext, Next, PipelineBehavior, RequestInfo, RequestMiddleware,
    };
    pub use crate::publish::{
        HandlerOutcome, HandlerStatus, NotificationMiddleware, NotificationNext, NotificationRef,
        PublishReport,
    };
    pub use crate::resolver::{Resolver, ServiceMap};
    pub use futures::future::BoxFuture;
    pub use tokio_util::sync::CancellationToken;
}
