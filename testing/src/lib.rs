//! # Switchyard Testing
//!
//! Testing utilities and helpers for the Switchyard mediator.
//!
//! This crate provides:
//! - Mock implementations of environment traits
//! - Recording handlers, middleware and observers that write to a shared
//!   [`CallLog`]
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_testing::{CallLog, RecordingMiddleware};
//!
//! #[tokio::test]
//! async fn test_middleware_wraps_handler() {
//!     let log = CallLog::new();
//!     let registry = RegistryBuilder::new()
//!         .request_fn::<Ping, _, _>(|_, _| async { Ok(Some(())) })
//!         .middleware(MiddlewareDescriptor::open_instance(Arc::new(
//!             RecordingMiddleware::new("timing", &log),
//!         )))
//!         .build();
//!
//!     Mediator::new(registry, Arc::new(ServiceMap::new())).send(Ping).await.unwrap();
//!     assert_eq!(log.entries(), vec!["timing:before", "timing:after"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use switchyard_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use switchyard_testing::mocks::FixedClock;
    /// use switchyard_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Recording doubles for handlers, middleware and observers.
pub mod recording;

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Middleware orders: a handful of values in a narrow range so ties
    /// are common.
    pub fn middleware_orders(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
        prop::collection::vec(-5i32..5, 0..=max_len)
    }
}

/// Install a `fmt` subscriber writing through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock};
pub use recording::{
    CallLog, RecordingHandler, RecordingMiddleware, RecordingNotificationMiddleware, RecordingObserver, TestError,
};
