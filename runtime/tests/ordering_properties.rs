//! Property-based tests for pipeline ordering and fan-out discovery
//!
//! ## Properties Verified
//!
//! - Middleware runs in a stable sort of its orders: ties keep
//!   registration order
//! - `inspect_pipeline` reports the chain a dispatch actually runs
//! - Publishing reaches every handler registered under a type in the
//!   notification's lattice exactly once, and no other handler

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use std::sync::Arc;
use switchyard_core::prelude::*;
use switchyard_macros::{Notification, Request};
use switchyard_runtime::{Mediator, MiddlewareDescriptor, RegistryBuilder};
use switchyard_testing::properties::middleware_orders;
use switchyard_testing::{CallLog, RecordingHandler, RecordingMiddleware};

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Request)]
#[request(response = u32)]
struct Reserve;

trait Trackable: Send + Sync {}

#[derive(Notification)]
struct OrderEvent;

#[derive(Notification)]
#[notification(implements(dyn Trackable))]
struct OrderShipped {
    #[notification(extends)]
    event: OrderEvent,
}

impl Trackable for OrderShipped {}

#[derive(Notification)]
struct UserEvent;

fn stable_order(orders: &[i32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..orders.len()).collect();
    indices.sort_by_key(|index| orders[*index]);
    indices
}

fn registry_with_orders(orders: &[i32], log: &CallLog) -> RegistryBuilder {
    orders.iter().enumerate().fold(
        RegistryBuilder::new().request_fn(|_request: Reserve, _ctx: DispatchContext| {
            futures::future::ready(Ok(Some(1)))
        }),
        |registry, (index, order)| {
            registry.middleware(MiddlewareDescriptor::open_instance(Arc::new(
                RecordingMiddleware::new(format!("m{index}"), log).with_order(*order),
            )))
        },
    )
}

// ============================================================================
// Middleware Ordering
// ============================================================================

proptest! {
    /// Property: middleware enters in ascending order, ties in registration order
    #[test]
    fn prop_middleware_runs_in_stable_order(orders in middleware_orders(8)) {
        let log = CallLog::new();
        let mediator = Mediator::builder(registry_with_orders(&orders, &log).build()).build();

        let reply = tokio_test::block_on(mediator.query(Reserve));
        prop_assert_eq!(reply.unwrap(), 1);

        let entered: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|entry| entry.ends_with(":before"))
            .collect();
        let expected: Vec<String> = stable_order(&orders)
            .into_iter()
            .map(|index| format!("m{index}:before"))
            .collect();
        prop_assert_eq!(entered, expected);
    }

    /// Property: every middleware that entered also left, innermost first
    #[test]
    fn prop_middleware_unwinds_in_reverse(orders in middleware_orders(8)) {
        let log = CallLog::new();
        let mediator = Mediator::builder(registry_with_orders(&orders, &log).build()).build();
        tokio_test::block_on(mediator.send(Reserve)).unwrap();

        let left: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|entry| entry.ends_with(":after"))
            .collect();
        let expected: Vec<String> = stable_order(&orders)
            .into_iter()
            .rev()
            .map(|index| format!("m{index}:after"))
            .collect();
        prop_assert_eq!(left, expected);
    }

    /// Property: inspection matches execution and is repeatable
    #[test]
    fn prop_inspection_matches_execution(orders in middleware_orders(8)) {
        let log = CallLog::new();
        let registry = registry_with_orders(&orders, &log).build();

        let stages = registry.inspect_pipeline::<Reserve>(&ServiceMap::new()).unwrap();
        let again = registry.inspect_pipeline::<Reserve>(&ServiceMap::new()).unwrap();
        prop_assert_eq!(&stages, &again);

        let mut sorted = orders.clone();
        sorted.sort_unstable();
        let inspected: Vec<i32> = stages.iter().map(|stage| stage.order).collect();
        prop_assert_eq!(inspected, sorted);
    }
}

// ============================================================================
// Fan-out Discovery
// ============================================================================

const KEYS: [&str; 4] = ["exact", "base", "interface", "unrelated"];

proptest! {
    /// Property: each lattice handler runs once, in plan order; others never run
    #[test]
    fn prop_fanout_reaches_lattice_handlers_once(counts in prop::collection::vec(0usize..3, 4)) {
        let log = CallLog::new();
        let mut registry = RegistryBuilder::new();
        // Reverse registration order must not change plan order.
        for (key, count) in KEYS.iter().zip(&counts).rev() {
            for index in 0..*count {
                let label = format!("{key}{index}");
                registry = match *key {
                    "exact" => registry.notification_handler_instance::<OrderShipped, _>(
                        Arc::new(RecordingHandler::new(label, &log)),
                    ),
                    "base" => registry.notification_handler_instance::<OrderEvent, _>(
                        Arc::new(RecordingHandler::new(label, &log)),
                    ),
                    "interface" => registry.notification_handler_instance::<dyn Trackable, _>(
                        Arc::new(RecordingHandler::new(label, &log)),
                    ),
                    _ => registry.notification_handler_instance::<UserEvent, _>(
                        Arc::new(RecordingHandler::new(label, &log)),
                    ),
                };
            }
        }
        let mediator = Mediator::builder(registry.build()).build();

        let shipped = OrderShipped { event: OrderEvent };
        let report = tokio_test::block_on(mediator.publish(&shipped)).unwrap();

        let expected: Vec<String> = KEYS[..3]
            .iter()
            .zip(&counts)
            .flat_map(|(key, count)| (0..*count).map(move |index| format!("{key}{index}")))
            .collect();
        prop_assert_eq!(report.handler_count(), expected.len());
        prop_assert_eq!(log.entries(), expected);
    }
}
