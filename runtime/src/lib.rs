//! # Switchyard Runtime
//!
//! In-process mediator for the Switchyard message contracts.
//!
//! This crate owns everything that happens between a caller handing a message
//! to the [`Mediator`] and the handlers seeing it: registration, middleware
//! ordering, pipeline composition, notification fan-out and the optional
//! statistics and metrics observers.
//!
//! ## Core Components
//!
//! - **Registry**: Registrations frozen into lookup tables at startup
//! - **Pipeline executor**: Builds and runs the middleware chain of one request
//! - **Fan-out engine**: Delivers one notification to every compatible handler
//! - **Mediator**: The facade: `send`, `query`, `dispatch` and `publish`
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_runtime::{Mediator, MiddlewareDescriptor, RegistryBuilder};
//!
//! let registry = RegistryBuilder::new()
//!     .request_handler::<PlaceOrder, _, _>(PlaceOrderHandler::from_resolver)
//!     .notification_handler::<dyn Trackable, _, _>(|_| Ok(TrackingProjection))
//!     .middleware(MiddlewareDescriptor::open(|_| Ok(Timing)))
//!     .build();
//!
//! let mediator = Mediator::new(registry, Arc::new(services));
//!
//! let order_id = mediator.send(PlaceOrder { sku, quantity: 2 }).await?;
//! mediator.publish(&OrderShipped { order_id, tracking }).await?;
//! ```

/// Handler bindings and their construction
pub mod binding;

/// Mediator configuration
pub mod config;

/// Notification fan-out
pub mod fanout;

/// The mediator facade
pub mod mediator;

/// Dispatch metrics through the `metrics` facade
pub mod metrics;

/// Middleware descriptors, constraints and ordering
pub mod middleware;

/// Request pipeline composition
pub mod pipeline;

/// Registration and the frozen handler registry
pub mod registry;

/// Per-message dispatch statistics
pub mod statistics;

pub use binding::{HandlerId, Lifetime, NotificationBinding, RequestBinding};
pub use config::{ConfigError, FailurePolicy, MediatorConfig, PublishStrategy};
pub use mediator::{Mediator, MediatorBuilder};
pub use middleware::{
    MiddlewareDescriptor, NotificationMiddlewareDescriptor, OrderSource, PipelineStage, RequestConstraint,
    RequestTarget, Setup,
};
pub use registry::{
    FanoutPlan, HandlerRegistry, RegistrationModule, RegistryBuilder, RegistryDiagnostics, RequestEntry,
};
pub use statistics::{MessageStatistics, StatisticsSnapshot, StatisticsTracker};
