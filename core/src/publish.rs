//! Notification middleware contract and publish outcomes.

use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::lattice::{TypeKey, TypeLattice};
use crate::message::Notification;
use crate::pipeline::DEFAULT_ORDER;
use futures::future::BoxFuture;
use serde::Serialize;
use std::any::Any;
use std::fmt;

/// A published notification as seen by notification middleware.
///
/// The notification is borrowed read-only; middleware may inspect it
/// through [`view`](Self::view) but cannot replace it.
#[derive(Clone, Copy)]
pub struct NotificationRef<'a> {
    value: &'a (dyn Any + Send + Sync + 'static),
    lattice: &'a TypeLattice,
    handler: &'static str,
}

impl<'a> NotificationRef<'a> {
    /// Borrow `value`, whose lattice is `lattice`, on its way to `handler`.
    #[must_use]
    pub const fn new(
        value: &'a (dyn Any + Send + Sync + 'static),
        lattice: &'a TypeLattice,
        handler: &'static str,
    ) -> Self {
        Self {
            value,
            lattice,
            handler,
        }
    }

    /// View the notification as one of its types: itself, a base type or
    /// an interface.
    #[must_use]
    pub fn view<T: ?Sized + 'static>(&self) -> Option<&'a T> {
        self.lattice.view::<T>(self.value)
    }

    /// The notification as its concrete type.
    #[must_use]
    pub fn downcast_ref<N: Notification>(&self) -> Option<&'a N> {
        self.value.downcast_ref::<N>()
    }

    /// The concrete notification type.
    #[must_use]
    pub const fn type_key(&self) -> TypeKey {
        self.lattice.message()
    }

    /// The concrete notification type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.lattice.message().name()
    }

    /// The notification's lattice.
    #[must_use]
    pub const fn lattice(&self) -> &'a TypeLattice {
        self.lattice
    }

    /// The handler this chain ends in.
    #[must_use]
    pub const fn handler(&self) -> &'static str {
        self.handler
    }
}

impl fmt::Debug for NotificationRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRef")
            .field("notification", &self.type_name())
            .field("handler", &self.handler)
            .finish()
    }
}

/// The rest of one handler's notification chain.
pub struct NotificationNext<'a> {
    stage: Box<dyn FnOnce() -> BoxFuture<'a, Result<(), DispatchError>> + Send + 'a>,
}

impl<'a> NotificationNext<'a> {
    /// Wrap the continuation of a notification chain.
    pub fn new(stage: impl FnOnce() -> BoxFuture<'a, Result<(), DispatchError>> + Send + 'a) -> Self {
        Self {
            stage: Box::new(stage),
        }
    }

    /// Continue towards the handler.
    pub fn run(self) -> BoxFuture<'a, Result<(), DispatchError>> {
        (self.stage)()
    }
}

impl fmt::Debug for NotificationNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotificationNext(<continuation>)")
    }
}

/// Middleware wrapped around each notification handler invocation.
///
/// One chain is built per matched handler, so a middleware runs once per
/// handler of a publish, not once per publish.
pub trait NotificationMiddleware: Send + Sync + 'static {
    /// Run this stage.
    fn handle<'a>(
        &'a self,
        notification: NotificationRef<'a>,
        next: NotificationNext<'a>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;

    /// Position in the chain; lower runs first (outermost).
    ///
    /// # Errors
    ///
    /// An error is not fatal: the middleware is placed at
    /// [`FALLBACK_ORDER`](crate::pipeline::FALLBACK_ORDER).
    fn order(&self) -> Result<i32, DispatchError> {
        Ok(DEFAULT_ORDER)
    }
}

/// How one handler fared during a publish.
#[derive(Debug, Clone)]
pub enum HandlerStatus {
    /// The handler chain completed
    Completed,
    /// The handler chain, or building it, failed
    Failed(DispatchError),
    /// Not attempted because an earlier handler failed
    Skipped,
}

impl HandlerStatus {
    /// The failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&DispatchError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Completed | Self::Skipped => None,
        }
    }
}

/// Outcome of one matched handler.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// Handler type name
    pub handler: &'static str,
    /// The key the handler was registered under
    pub registered_for: TypeKey,
    /// What happened
    pub status: HandlerStatus,
}

/// Aggregated result of publishing one notification.
#[derive(Debug, Clone)]
pub struct PublishReport {
    notification: TypeKey,
    outcomes: Vec<HandlerOutcome>,
}

impl PublishReport {
    /// Assemble a report.
    #[must_use]
    pub const fn new(notification: TypeKey, outcomes: Vec<HandlerOutcome>) -> Self {
        Self {
            notification,
            outcomes,
        }
    }

    /// The published notification type.
    #[must_use]
    pub const fn notification(&self) -> TypeKey {
        self.notification
    }

    /// One outcome per matched handler, in plan order.
    #[must_use]
    pub fn outcomes(&self) -> &[HandlerOutcome] {
        &self.outcomes
    }

    /// Number of matched handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of handlers that completed.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.count(|status| matches!(status, HandlerStatus::Completed))
    }

    /// Number of handlers that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|status| matches!(status, HandlerStatus::Failed(_)))
    }

    /// Number of handlers that were never attempted.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|status| matches!(status, HandlerStatus::Skipped))
    }

    /// The first failure in plan order.
    #[must_use]
    pub fn first_error(&self) -> Option<&DispatchError> {
        self.errors().next()
    }

    /// Every failure in plan order.
    pub fn errors(&self) -> impl Iterator<Item = &DispatchError> + '_ {
        self.outcomes.iter().filter_map(|outcome| outcome.status.error())
    }

    /// Whether no handler failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Turn the report into an error if any handler failed.
    ///
    /// # Errors
    ///
    /// Returns the first failure in plan order.
    pub fn into_result(self) -> Result<Self, DispatchError> {
        match self.first_error() {
            Some(error) => Err(error.clone()),
            None => Ok(self),
        }
    }

    /// A serialisable digest of the report.
    #[must_use]
    pub fn summary(&self) -> PublishSummary {
        PublishSummary {
            notification: self.notification.name(),
            handlers: self.handler_count(),
            completed: self.completed_count(),
            failed: self.failed_count(),
            skipped: self.skipped_count(),
        }
    }

    fn count(&self, predicate: impl Fn(&HandlerStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| predicate(&outcome.status)).count()
    }
}

/// Counts from a [`PublishReport`], suitable for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    /// Notification type name
    pub notification: &'static str,
    /// Matched handlers
    pub handlers: usize,
    /// Handlers that completed
    pub completed: usize,
    /// Handlers that failed
    pub failed: usize,
    /// Handlers never attempted
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    trait Priced: Send + Sync {
        fn cents(&self) -> u64;
    }

    struct PriceChanged {
        cents: u64,
    }

    impl Priced for PriceChanged {
        fn cents(&self) -> u64 {
            self.cents
        }
    }

    fn as_priced(event: &PriceChanged) -> &(dyn Priced + 'static) {
        event
    }

    impl Message for PriceChanged {
        fn describe(lattice: &mut crate::lattice::LatticeBuilder<Self>) {
            lattice.implements::<dyn Priced>(as_priced);
        }
    }

    impl Notification for PriceChanged {}

    fn outcome(handler: &'static str, status: HandlerStatus) -> HandlerOutcome {
        HandlerOutcome {
            handler,
            registered_for: TypeKey::of::<PriceChanged>(),
            status,
        }
    }

    #[test]
    fn test_notification_ref_views() {
        let lattice = TypeLattice::of::<PriceChanged>();
        let event = PriceChanged { cents: 499 };
        let notification = NotificationRef::new(&event, &lattice, "Repricer");

        assert_eq!(notification.view::<dyn Priced>().map(Priced::cents), Some(499));
        assert_eq!(notification.downcast_ref::<PriceChanged>().map(|e| e.cents), Some(499));
        assert!(notification.type_name().contains("PriceChanged"));
        assert_eq!(notification.handler(), "Repricer");
    }

    #[test]
    fn test_report_surfaces_first_error_in_plan_order() {
        let report = PublishReport::new(
            TypeKey::of::<PriceChanged>(),
            vec![
                outcome("A", HandlerStatus::Completed),
                outcome("B", HandlerStatus::Failed(DispatchError::handler("b broke"))),
                outcome("C", HandlerStatus::Failed(DispatchError::handler("c broke"))),
                outcome("D", HandlerStatus::Skipped),
            ],
        );

        assert!(!report.is_success());
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.errors().count(), 2);
        assert_eq!(report.first_error().map(ToString::to_string), Some("b broke".to_string()));

        let summary = report.summary();
        assert_eq!((summary.handlers, summary.completed), (4, 1));

        let error = report.into_result().unwrap_err();
        assert_eq!(error.to_string(), "b broke");
    }

    #[test]
    fn test_empty_report_is_success() {
        let report = PublishReport::new(TypeKey::of::<PriceChanged>(), Vec::new());
        assert!(report.is_success());
        assert_eq!(report.handler_count(), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_notification_next_runs_once() {
        let next = NotificationNext::new(|| Box::pin(async { Err(DispatchError::Cancelled) }));
        assert!(next.run().await.is_err());
    }
}
