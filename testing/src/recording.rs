//! Recording doubles.
//!
//! Every double writes to a shared [`CallLog`] so a test can assert on the
//! exact interleaving of middleware, handlers and observer callbacks.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only a poisoned log panics

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::DispatchError;
use switchyard_core::handler::NotificationHandler;
use switchyard_core::observer::{DispatchEvent, DispatchObserver};
use switchyard_core::pipeline::{AnyReply, AnyRequest, ErasedNext, PipelineBehavior, RequestInfo};
use switchyard_core::publish::{NotificationMiddleware, NotificationNext, NotificationRef};
use switchyard_core::BoxFuture;
use thiserror::Error;

/// Failure raised by recording doubles set up to fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TestError(pub String);

/// Shared, ordered log of calls.
///
/// Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// How many entries equal `entry`.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().unwrap().iter().filter(|logged| *logged == entry).count()
    }

    /// Index of the first entry equal to `entry`.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|logged| logged == entry)
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Last path segment of a type name: `app::orders::PlaceOrder` becomes
/// `PlaceOrder`.
#[must_use]
pub fn short_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

/// Notification handler logging its label on every invocation.
///
/// Implements [`NotificationHandler<T>`] for the `T` it was created for,
/// including `dyn` interfaces.
pub struct RecordingHandler<T: ?Sized> {
    label: String,
    log: CallLog,
    failure: Option<String>,
    _target: PhantomData<fn(&T)>,
}

impl<T: ?Sized> RecordingHandler<T> {
    /// A handler that logs `label` and completes.
    #[must_use]
    pub fn new(label: impl Into<String>, log: &CallLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            failure: None,
            _target: PhantomData,
        }
    }

    /// A handler that logs `label` and fails with a [`TestError`].
    #[must_use]
    pub fn failing(label: impl Into<String>, log: &CallLog, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(label, log)
        }
    }
}

impl<T: ?Sized + 'static> NotificationHandler<T> for RecordingHandler<T> {
    fn handle<'a>(&'a self, _notification: &'a T, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.log.push(self.label.clone());
            match &self.failure {
                Some(message) => Err(DispatchError::handler(TestError(message.clone()))),
                None => Ok(()),
            }
        })
    }
}

impl<T: ?Sized> std::fmt::Debug for RecordingHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("label", &self.label)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Open request middleware logging `label:before` and `label:after`
/// around the rest of the chain.
#[derive(Debug, Clone)]
pub struct RecordingMiddleware {
    label: String,
    log: CallLog,
    order: i32,
    order_fails: bool,
}

impl RecordingMiddleware {
    /// A middleware at the default order.
    #[must_use]
    pub fn new(label: impl Into<String>, log: &CallLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            order: 0,
            order_fails: false,
        }
    }

    /// Report `order` from `order()`.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Make `order()` fail.
    #[must_use]
    pub const fn with_failing_order(mut self) -> Self {
        self.order_fails = true;
        self
    }
}

impl PipelineBehavior for RecordingMiddleware {
    fn handle<'a>(
        &'a self,
        request: AnyRequest,
        _info: &'a RequestInfo,
        next: ErasedNext<'a>,
        _ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, AnyReply> {
        Box::pin(async move {
            self.log.push(format!("{}:before", self.label));
            let reply = next.run(request).await;
            self.log.push(format!("{}:after", self.label));
            reply
        })
    }

    fn order(&self) -> Result<i32, DispatchError> {
        if self.order_fails {
            return Err(DispatchError::handler(TestError(format!("{} has no order", self.label))));
        }
        Ok(self.order)
    }
}

/// Notification middleware logging `label:before` and `label:after`
/// around each handler.
#[derive(Debug, Clone)]
pub struct RecordingNotificationMiddleware {
    label: String,
    log: CallLog,
    order: i32,
}

impl RecordingNotificationMiddleware {
    /// A middleware at the default order.
    #[must_use]
    pub fn new(label: impl Into<String>, log: &CallLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            order: 0,
        }
    }

    /// Report `order` from `order()`.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl NotificationMiddleware for RecordingNotificationMiddleware {
    fn handle<'a>(
        &'a self,
        _notification: NotificationRef<'a>,
        next: NotificationNext<'a>,
        _ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.log.push(format!("{}:before", self.label));
            let result = next.run().await;
            self.log.push(format!("{}:after", self.label));
            result
        })
    }

    fn order(&self) -> Result<i32, DispatchError> {
        Ok(self.order)
    }
}

/// Observer logging `start:Name`, `success:Name` and `failure:Name`.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    log: CallLog,
}

impl RecordingObserver {
    /// An observer writing to `log`.
    #[must_use]
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }
}

impl DispatchObserver for RecordingObserver {
    fn on_start(&self, event: &DispatchEvent) {
        self.log.push(format!("start:{}", short_name(event.message)));
    }

    fn on_success(&self, event: &DispatchEvent, _elapsed: Duration) {
        self.log.push(format!("success:{}", short_name(event.message)));
    }

    fn on_failure(&self, event: &DispatchEvent, _error: &DispatchError, _elapsed: Duration) {
        self.log.push(format!("failure:{}", short_name(event.message)));
    }
}
