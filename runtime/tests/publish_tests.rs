//! Integration tests for notification fan-out
//!
//! Covers handler discovery over the type lattice, deduplication, failure
//! policies, publish strategies and notification middleware.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchyard_core::prelude::*;
use switchyard_macros::Notification;
use switchyard_runtime::{
    FailurePolicy, HandlerRegistry, Mediator, MediatorConfig, NotificationMiddlewareDescriptor, PublishStrategy,
    RegistryBuilder,
};
use switchyard_testing::{
    init_test_tracing, CallLog, RecordingHandler, RecordingNotificationMiddleware, RecordingObserver,
};

// ============================================================================
// Test Fixtures
// ============================================================================

trait Trackable: Send + Sync {
    fn tracking(&self) -> &str;
}

#[derive(Notification, Debug)]
struct OrderEvent {
    order_id: u64,
}

#[derive(Notification, Debug)]
#[notification(implements(dyn Trackable))]
struct OrderShipped {
    #[notification(extends)]
    event: OrderEvent,
    tracking: String,
}

impl Trackable for OrderShipped {
    fn tracking(&self) -> &str {
        &self.tracking
    }
}

#[derive(Notification, Debug)]
struct UserEvent;

fn shipped() -> OrderShipped {
    OrderShipped {
        event: OrderEvent { order_id: 7 },
        tracking: "TRK-1".into(),
    }
}

/// Reads the projected views so tests see what the handler was given.
struct TrackingProjection {
    log: CallLog,
}

impl NotificationHandler<dyn Trackable> for TrackingProjection {
    fn handle<'a>(
        &'a self,
        notification: &'a (dyn Trackable + 'static),
        _ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.log.push(format!("tracking:{}", notification.tracking()));
            Ok(())
        })
    }
}

struct OrderLedger {
    log: CallLog,
}

impl NotificationHandler<OrderEvent> for OrderLedger {
    fn handle<'a>(&'a self, event: &'a OrderEvent, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.log.push(format!("ledger:{}", event.order_id));
            Ok(())
        })
    }
}

/// Handles both `OrderEvent` and `OrderShipped`.
#[derive(Default)]
struct ShipmentCounter {
    calls: AtomicUsize,
}

impl NotificationHandler<OrderEvent> for ShipmentCounter {
    fn handle<'a>(&'a self, _event: &'a OrderEvent, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

impl NotificationHandler<OrderShipped> for ShipmentCounter {
    fn handle<'a>(
        &'a self,
        _event: &'a OrderShipped,
        _ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

fn mediator(registry: HandlerRegistry, config: MediatorConfig) -> Mediator {
    Mediator::builder(registry)
        .with_config(config)
        .build()
}

/// Two handlers under `OrderEvent`, the first failing.
fn failing_first(log: &CallLog) -> HandlerRegistry {
    RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::failing("first", log, "boom")))
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("second", log)))
        .build()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_base_and_interface_handlers_once() {
    init_test_tracing();
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(OrderLedger { log: log.clone() }))
        .notification_handler_instance::<dyn Trackable, _>(Arc::new(TrackingProjection { log: log.clone() }))
        .notification_handler_instance::<UserEvent, _>(Arc::new(RecordingHandler::new("user", &log)))
        .notification::<OrderShipped>()
        .build();
    let mediator = mediator(registry, MediatorConfig::default());

    let report = mediator.publish(&shipped()).await.unwrap();

    assert_eq!(log.entries(), vec!["ledger:7", "tracking:TRK-1"]);
    assert_eq!(report.handler_count(), 2);
    assert_eq!(report.completed_count(), 2);
    assert_eq!(report.outcomes()[0].registered_for, TypeKey::of::<OrderEvent>());
    assert_eq!(report.outcomes()[1].registered_for, TypeKey::of::<dyn Trackable>());
}

#[tokio::test]
async fn test_exact_handlers_run_before_base_and_interface_handlers() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<dyn Trackable, _>(Arc::new(RecordingHandler::new("interface", &log)))
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("base", &log)))
        .notification_handler_instance::<OrderShipped, _>(Arc::new(RecordingHandler::new("exact", &log)))
        .build();

    mediator(registry, MediatorConfig::default())
        .publish(&shipped())
        .await
        .unwrap();

    assert_eq!(log.entries(), vec!["exact", "base", "interface"]);
}

#[tokio::test]
async fn test_shared_instance_under_two_keys_runs_once() {
    let counter = Arc::new(ShipmentCounter::default());
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::clone(&counter))
        .notification_handler_instance::<OrderShipped, _>(Arc::clone(&counter))
        .build();
    assert_eq!(registry.notification_handlers::<OrderShipped>().len(), 1);

    let report = mediator(registry, MediatorConfig::default())
        .publish(&shipped())
        .await
        .unwrap();

    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.outcomes()[0].registered_for, TypeKey::of::<OrderShipped>());
}

#[tokio::test]
async fn test_distinct_instances_of_one_type_both_run() {
    let first = Arc::new(ShipmentCounter::default());
    let second = Arc::new(ShipmentCounter::default());
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::clone(&first))
        .notification_handler_instance::<OrderShipped, _>(Arc::clone(&second))
        .build();

    mediator(registry, MediatorConfig::default())
        .publish(&shipped())
        .await
        .unwrap();

    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_publish_without_handlers_succeeds() {
    let registry = RegistryBuilder::new().build();
    let report = mediator(registry, MediatorConfig::default())
        .publish(&UserEvent)
        .await
        .unwrap();

    assert_eq!(report.handler_count(), 0);
    assert!(report.is_success());
}

#[test]
fn test_declared_and_undeclared_plans_match() {
    let log = CallLog::new();
    let build = |declare: bool| {
        let registry = RegistryBuilder::new()
            .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("base", &log)))
            .notification_handler_instance::<dyn Trackable, _>(Arc::new(RecordingHandler::new("interface", &log)));
        let registry = if declare {
            registry.notification::<OrderShipped>()
        } else {
            registry
        };
        registry.build()
    };

    let declared = build(true);
    let undeclared = build(false);
    assert!(declared.is_declared(TypeKey::of::<OrderShipped>()));
    assert!(!undeclared.is_declared(TypeKey::of::<OrderShipped>()));

    let names = |registry: &HandlerRegistry| -> Vec<(&'static str, TypeKey)> {
        registry
            .notification_handlers::<OrderShipped>()
            .iter()
            .map(|binding| (binding.name(), binding.registered_for()))
            .collect()
    };
    assert_eq!(names(&declared), names(&undeclared));
    assert!(declared.diagnostics().is_clean());
    assert_eq!(undeclared.diagnostics().unreachable_handlers.len(), 2);
}

// ============================================================================
// Failure Policies
// ============================================================================

#[tokio::test]
async fn test_every_handler_attempted_before_first_error_surfaces() {
    let log = CallLog::new();
    let mediator = mediator(failing_first(&log), MediatorConfig::default());

    let error = mediator.publish(&OrderEvent { order_id: 1 }).await.unwrap_err();

    assert_eq!(error.to_string(), "boom");
    assert_eq!(log.entries(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_report_aggregates_every_outcome() {
    let log = CallLog::new();
    let mediator = mediator(failing_first(&log), MediatorConfig::default());

    let report = mediator.publish_report(&OrderEvent { order_id: 1 }).await;

    assert_eq!((report.completed_count(), report.failed_count()), (1, 1));
    assert_eq!(report.errors().count(), 1);
    assert!(matches!(report.outcomes()[0].status, HandlerStatus::Failed(_)));
    assert!(matches!(report.outcomes()[1].status, HandlerStatus::Completed));
    assert_eq!(report.summary().failed, 1);
}

#[tokio::test]
async fn test_stop_on_first_error_skips_remaining_handlers() {
    let log = CallLog::new();
    let config = MediatorConfig::default().with_failure_policy(FailurePolicy::StopOnFirstError);
    let mediator = mediator(failing_first(&log), config);

    let report = mediator.publish_report(&OrderEvent { order_id: 1 }).await;

    assert_eq!(log.entries(), vec!["first"]);
    assert_eq!(report.skipped_count(), 1);
    assert!(matches!(report.outcomes()[1].status, HandlerStatus::Skipped));
    assert!(report.first_error().is_some());
}

#[tokio::test]
async fn test_concurrent_strategy_runs_every_handler() {
    let log = CallLog::new();
    let config = MediatorConfig::default().with_publish_strategy(PublishStrategy::Concurrent);
    let mediator = mediator(failing_first(&log), config);

    let report = mediator.publish_report(&OrderEvent { order_id: 1 }).await;

    assert_eq!(log.len(), 2);
    assert_eq!(log.count("first"), 1);
    assert_eq!(log.count("second"), 1);
    assert!(matches!(report.outcomes()[0].status, HandlerStatus::Failed(_)));
    assert_eq!(report.first_error().map(ToString::to_string), Some("boom".to_string()));
}

#[tokio::test]
async fn test_handler_construction_failure_is_isolated() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler::<OrderEvent, RecordingHandler<OrderEvent>, _>(|_| {
            Err(ConstructionError::Failed("no mailbox".into()))
        })
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("mailer", &log)))
        .build();

    let report = mediator(registry, MediatorConfig::default())
        .publish_report(&OrderEvent { order_id: 1 })
        .await;

    assert_eq!(log.entries(), vec!["mailer"]);
    let error = report.first_error().unwrap();
    assert!(matches!(error, DispatchError::HandlerConstruction { .. }));
}

// ============================================================================
// Notification Middleware
// ============================================================================

#[tokio::test]
async fn test_middleware_wraps_each_handler() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("a", &log)))
        .notification_handler_instance::<dyn Trackable, _>(Arc::new(RecordingHandler::new("b", &log)))
        .notification_middleware(NotificationMiddlewareDescriptor::instance(Arc::new(
            RecordingNotificationMiddleware::new("outer", &log).with_order(-1),
        )))
        .notification_middleware(NotificationMiddlewareDescriptor::instance(Arc::new(
            RecordingNotificationMiddleware::new("inner", &log),
        )))
        .build();

    mediator(registry, MediatorConfig::default())
        .publish(&shipped())
        .await
        .unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "outer:before", "inner:before", "a", "inner:after", "outer:after",
            "outer:before", "inner:before", "b", "inner:after", "outer:after",
        ]
    );
}

#[tokio::test]
async fn test_middleware_interface_constraint() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("order", &log)))
        .notification_middleware(
            NotificationMiddlewareDescriptor::instance(Arc::new(RecordingNotificationMiddleware::new("track", &log)))
                .implementing::<dyn Trackable>(),
        )
        .build();
    let mediator = mediator(registry, MediatorConfig::default());

    mediator.publish(&OrderEvent { order_id: 1 }).await.unwrap();
    assert_eq!(log.entries(), vec!["order"]);

    log.clear();
    mediator.publish(&shipped()).await.unwrap();
    assert_eq!(log.entries(), vec!["track:before", "order", "track:after"]);
}

#[tokio::test]
async fn test_middleware_can_be_switched_off() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("order", &log)))
        .notification_middleware(NotificationMiddlewareDescriptor::instance(Arc::new(
            RecordingNotificationMiddleware::new("mw", &log),
        )))
        .build();
    let config = MediatorConfig::default().with_notification_middleware(false);

    mediator(registry, config)
        .publish(&OrderEvent { order_id: 1 })
        .await
        .unwrap();

    assert_eq!(log.entries(), vec!["order"]);
}

#[tokio::test]
async fn test_middleware_construction_failure_fails_each_handler() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("a", &log)))
        .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("b", &log)))
        .notification_middleware(NotificationMiddlewareDescriptor::new(|setup| {
            let _outbox = setup.resolve::<CallLog>()?;
            Ok(RecordingNotificationMiddleware::new("unreachable", &CallLog::new()))
        }))
        .build();

    let report = mediator(registry, MediatorConfig::default())
        .publish_report(&OrderEvent { order_id: 1 })
        .await;

    assert!(log.is_empty());
    assert_eq!(report.failed_count(), 2);
    assert!(report
        .errors()
        .all(|error| matches!(error, DispatchError::MiddlewareConstruction { .. })));
}

#[tokio::test]
async fn test_inspect_notification_pipeline() {
    let log = CallLog::new();
    let registry = RegistryBuilder::new()
        .notification_middleware(
            NotificationMiddlewareDescriptor::instance(Arc::new(RecordingNotificationMiddleware::new("a", &log)))
                .with_order(3),
        )
        .notification_middleware(
            NotificationMiddlewareDescriptor::instance(Arc::new(RecordingNotificationMiddleware::new("b", &log)))
                .implementing::<dyn Trackable>(),
        )
        .build();

    let stages = registry
        .inspect_notification_pipeline::<OrderShipped>(&ServiceMap::new())
        .unwrap();
    let orders: Vec<i32> = stages.iter().map(|stage| stage.order).collect();
    assert_eq!(orders, vec![0, 3]);

    let stages = registry
        .inspect_notification_pipeline::<OrderEvent>(&ServiceMap::new())
        .unwrap();
    assert_eq!(stages.len(), 1);
}

#[tokio::test]
async fn test_mediator_inspection_honours_disabled_notification_middleware() {
    let log = CallLog::new();
    let registry = || {
        RegistryBuilder::new()
            .notification_handler_instance::<OrderEvent, _>(Arc::new(RecordingHandler::new("order", &log)))
            .notification_middleware(NotificationMiddlewareDescriptor::instance(Arc::new(
                RecordingNotificationMiddleware::new("mw", &log),
            )))
            .build()
    };

    let enabled = mediator(registry(), MediatorConfig::default());
    assert_eq!(enabled.inspect_notification_pipeline::<OrderEvent>().unwrap().len(), 1);

    let disabled = mediator(registry(), MediatorConfig::default().with_notification_middleware(false));
    assert!(disabled.inspect_notification_pipeline::<OrderEvent>().unwrap().is_empty());
    assert_eq!(
        disabled
            .registry()
            .inspect_notification_pipeline::<OrderEvent>(&ServiceMap::new())
            .unwrap()
            .len(),
        1
    );

    disabled.publish(&OrderEvent { order_id: 1 }).await.unwrap();
    assert_eq!(log.entries(), vec!["order"]);
}

// ============================================================================
// Observers
// ============================================================================

#[tokio::test]
async fn test_observers_see_publish_outcome() {
    let log = CallLog::new();
    let handler_log = CallLog::new();
    let registry = failing_first(&handler_log);
    let mediator = Mediator::builder(registry)
        .with_observer(Arc::new(RecordingObserver::new(&log)))
        .with_config(MediatorConfig::default().with_statistics(true))
        .build();

    mediator.publish_report(&OrderEvent { order_id: 1 }).await;
    mediator.publish_report(&UserEvent).await;

    assert_eq!(
        log.entries(),
        vec!["start:OrderEvent", "failure:OrderEvent", "start:UserEvent", "success:UserEvent"]
    );
    let snapshot = mediator.statistics().unwrap().snapshot();
    let order_stats = snapshot.get(std::any::type_name::<OrderEvent>()).unwrap();
    assert_eq!(order_stats.kind, MessageKind::Notification);
    assert_eq!(order_stats.failed, 1);
}
