//! The mediator facade.

use crate::config::MediatorConfig;
use crate::fanout::FanoutEngine;
use crate::metrics::MetricsObserver;
use crate::middleware::PipelineStage;
use crate::pipeline::PipelineExecutor;
use crate::registry::HandlerRegistry;
use crate::statistics::StatisticsTracker;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::DispatchError;
use switchyard_core::lattice::TypeKey;
use switchyard_core::message::{MessageKind, Notification, Request};
use switchyard_core::observer::{DispatchEvent, DispatchObserver};
use switchyard_core::pipeline::downcast_response;
use switchyard_core::publish::PublishReport;
use switchyard_core::resolver::{Resolver, ServiceMap};
use tokio_util::sync::CancellationToken;

/// Builds a [`Mediator`].
///
/// # Example
///
/// ```ignore
/// let mediator = Mediator::builder(registry)
///     .with_resolver(Arc::new(services))
///     .with_config(MediatorConfig::default().with_statistics(true))
///     .with_observer(Arc::new(AuditTrail::default()))
///     .build();
/// ```
pub struct MediatorBuilder {
    registry: HandlerRegistry,
    resolver: Arc<dyn Resolver>,
    config: MediatorConfig,
    observers: Vec<Arc<dyn DispatchObserver>>,
    statistics: Option<Arc<StatisticsTracker>>,
}

impl MediatorBuilder {
    /// Start from a frozen registry, an empty resolver and the default
    /// configuration.
    #[must_use]
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            resolver: Arc::new(ServiceMap::new()),
            config: MediatorConfig::default(),
            observers: Vec::new(),
            statistics: None,
        }
    }

    /// Set the resolver handlers and middleware are built from.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an observer. Observers are called in registration order.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Use `tracker` for statistics instead of an internal one.
    ///
    /// Implies `record_statistics`.
    #[must_use]
    pub fn with_statistics(mut self, tracker: Arc<StatisticsTracker>) -> Self {
        self.statistics = Some(tracker);
        self
    }

    /// Build the mediator.
    #[must_use]
    pub fn build(self) -> Mediator {
        let Self {
            registry,
            resolver,
            config,
            mut observers,
            statistics,
        } = self;

        let statistics = statistics.or_else(|| {
            config
                .record_statistics
                .then(|| Arc::new(StatisticsTracker::default()))
        });
        if let Some(tracker) = &statistics {
            observers.push(Arc::clone(tracker) as Arc<dyn DispatchObserver>);
        }
        if config.record_metrics {
            observers.push(Arc::new(MetricsObserver));
        }

        tracing::debug!(
            observers = observers.len(),
            strategy = ?config.publish_strategy,
            policy = ?config.failure_policy,
            "Mediator built"
        );

        Mediator {
            inner: Arc::new(Inner {
                fanout: FanoutEngine::new(&config),
                executor: PipelineExecutor::new(),
                registry,
                resolver,
                config,
                observers,
                statistics,
            }),
        }
    }
}

impl fmt::Debug for MediatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatorBuilder")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

struct Inner {
    registry: HandlerRegistry,
    resolver: Arc<dyn Resolver>,
    config: MediatorConfig,
    observers: Vec<Arc<dyn DispatchObserver>>,
    statistics: Option<Arc<StatisticsTracker>>,
    executor: PipelineExecutor,
    fanout: FanoutEngine,
}

/// Sends requests and publishes notifications.
///
/// Everything is fixed at construction; the mediator has no mutable state
/// of its own. Cloning is cheap and clones share the registry.
///
/// # Example
///
/// ```ignore
/// let mediator = Mediator::new(registry, Arc::new(services));
///
/// let order_id = mediator.send(PlaceOrder { sku, quantity: 2 }).await?;
/// let balance = mediator.query(GetBalance { account }).await?;
/// mediator.publish(&OrderShipped { order_id, tracking }).await?;
/// ```
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<Inner>,
}

impl Mediator {
    /// A mediator with the default configuration.
    #[must_use]
    pub fn new(registry: HandlerRegistry, resolver: Arc<dyn Resolver>) -> Self {
        MediatorBuilder::new(registry).with_resolver(resolver).build()
    }

    /// Start building a mediator.
    #[must_use]
    pub fn builder(registry: HandlerRegistry) -> MediatorBuilder {
        MediatorBuilder::new(registry)
    }

    /// The registry, for introspection.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &MediatorConfig {
        &self.inner.config
    }

    /// The statistics tracker, if statistics are recorded.
    #[must_use]
    pub fn statistics(&self) -> Option<&StatisticsTracker> {
        self.inner.statistics.as_deref()
    }

    /// The middleware chain a dispatch of `R` runs, outermost first,
    /// built through this mediator's resolver.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MiddlewareConstruction`] if a middleware
    /// cannot be built.
    pub fn inspect_pipeline<R: Request>(&self) -> Result<Vec<PipelineStage>, DispatchError> {
        self.inner.registry.inspect_pipeline::<R>(&*self.inner.resolver)
    }

    /// The middleware chain each handler of `N` runs in, outermost first.
    ///
    /// Empty when notification middleware is turned off in the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MiddlewareConstruction`] if a middleware
    /// cannot be built.
    pub fn inspect_notification_pipeline<N: Notification>(&self) -> Result<Vec<PipelineStage>, DispatchError> {
        if !self.inner.config.notification_middleware {
            return Ok(Vec::new());
        }
        self.inner
            .registry
            .inspect_notification_pipeline::<N>(&*self.inner.resolver)
    }

    /// Dispatch a request to its handler.
    ///
    /// Commands may complete without a result. A query that completes
    /// without one fails.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::HandlerNotFound`] / [`DispatchError::AmbiguousHandler`]
    ///   unless exactly one handler is registered for `R`
    /// - [`DispatchError::ResultRequired`] for a query without a result
    /// - construction, cancellation and handler failures from the pipeline
    pub async fn dispatch<R: Request>(&self, request: R) -> Result<Option<R::Response>, DispatchError> {
        self.dispatch_with(request, CancellationToken::new()).await
    }

    /// [`dispatch`](Self::dispatch) with a caller-provided cancellation
    /// token.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    #[tracing::instrument(skip_all, name = "mediator_dispatch", fields(request = std::any::type_name::<R>()))]
    pub async fn dispatch_with<R: Request>(
        &self,
        request: R,
        token: CancellationToken,
    ) -> Result<Option<R::Response>, DispatchError> {
        let event = DispatchEvent::new(MessageKind::from(R::KIND), std::any::type_name::<R>());
        self.observed(&event, self.run_request(request, token)).await
    }

    /// Send a command. Same as [`dispatch`](Self::dispatch).
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn send<R: Request>(&self, command: R) -> Result<Option<R::Response>, DispatchError> {
        self.dispatch(command).await
    }

    /// [`send`](Self::send) with a caller-provided cancellation token.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn send_with<R: Request>(
        &self,
        command: R,
        token: CancellationToken,
    ) -> Result<Option<R::Response>, DispatchError> {
        self.dispatch_with(command, token).await
    }

    /// Run a request that must produce a result.
    ///
    /// # Errors
    ///
    /// As [`dispatch`](Self::dispatch), plus
    /// [`DispatchError::ResultRequired`] whenever the handler produced no
    /// result, whatever the request kind.
    pub async fn query<R: Request>(&self, query: R) -> Result<R::Response, DispatchError> {
        self.query_with(query, CancellationToken::new()).await
    }

    /// [`query`](Self::query) with a caller-provided cancellation token.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub async fn query_with<R: Request>(&self, query: R, token: CancellationToken) -> Result<R::Response, DispatchError> {
        self.dispatch_with(query, token)
            .await?
            .ok_or(DispatchError::ResultRequired {
                request: std::any::type_name::<R>(),
            })
    }

    /// Publish a notification to every compatible handler.
    ///
    /// Every handler is attempted (unless the failure policy says
    /// otherwise) before the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure in plan order.
    pub async fn publish<N: Notification>(&self, notification: &N) -> Result<PublishReport, DispatchError> {
        self.publish_report(notification).await.into_result()
    }

    /// [`publish`](Self::publish) with a caller-provided cancellation
    /// token.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub async fn publish_with<N: Notification>(
        &self,
        notification: &N,
        token: CancellationToken,
    ) -> Result<PublishReport, DispatchError> {
        self.publish_report_with(notification, token).await.into_result()
    }

    /// Publish and return every handler's outcome without failing.
    pub async fn publish_report<N: Notification>(&self, notification: &N) -> PublishReport {
        self.publish_report_with(notification, CancellationToken::new()).await
    }

    /// [`publish_report`](Self::publish_report) with a caller-provided
    /// cancellation token.
    #[tracing::instrument(skip_all, name = "mediator_publish", fields(notification = std::any::type_name::<N>()))]
    pub async fn publish_report_with<N: Notification>(
        &self,
        notification: &N,
        token: CancellationToken,
    ) -> PublishReport {
        let event = DispatchEvent::new(MessageKind::Notification, std::any::type_name::<N>());
        self.notify_start(&event);
        let started = Instant::now();

        let plan = self.inner.registry.fanout_plan::<N>();
        let ctx = self.context(token);
        let report = self.inner.fanout.publish(notification, &plan, &ctx).await;

        let elapsed = started.elapsed();
        match report.first_error() {
            None => self.notify_success(&event, elapsed),
            Some(error) => self.notify_failure(&event, error, elapsed),
        }
        tracing::debug!(summary = ?report.summary(), "Notification published");
        report
    }

    async fn run_request<R: Request>(
        &self,
        request: R,
        token: CancellationToken,
    ) -> Result<Option<R::Response>, DispatchError> {
        let request_name = std::any::type_name::<R>();
        let entry = self
            .inner
            .registry
            .request_entry(TypeKey::of::<R>())
            .ok_or(DispatchError::HandlerNotFound { request: request_name })?;
        let binding = entry.handler()?;
        tracing::debug!(
            handler = binding.name(),
            middleware = entry.middleware().len(),
            "Resolved request handler"
        );

        let ctx = self.context(token);
        let reply = self
            .inner
            .executor
            .execute(Box::new(request), binding, entry, &ctx)
            .await?;
        let response = reply
            .map(|response| downcast_response::<R::Response>(response, "pipeline"))
            .transpose()?;

        if response.is_none() && R::KIND.requires_result() {
            return Err(DispatchError::ResultRequired { request: request_name });
        }
        Ok(response)
    }

    fn context(&self, token: CancellationToken) -> DispatchContext {
        DispatchContext::new(Arc::clone(&self.inner.resolver), token)
    }

    async fn observed<T>(
        &self,
        event: &DispatchEvent,
        dispatch: impl Future<Output = Result<T, DispatchError>>,
    ) -> Result<T, DispatchError> {
        self.notify_start(event);
        let started = Instant::now();
        let result = dispatch.await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => self.notify_success(event, elapsed),
            Err(error) => {
                if error.is_cancelled() {
                    tracing::debug!("Dispatch cancelled");
                } else {
                    tracing::warn!(error = %error, "Dispatch failed");
                }
                self.notify_failure(event, error, elapsed);
            }
        }
        result
    }

    fn notify_start(&self, event: &DispatchEvent) {
        for observer in &self.inner.observers {
            observer.on_start(event);
        }
    }

    fn notify_success(&self, event: &DispatchEvent, elapsed: std::time::Duration) {
        for observer in &self.inner.observers {
            observer.on_success(event, elapsed);
        }
    }

    fn notify_failure(&self, event: &DispatchEvent, error: &DispatchError, elapsed: std::time::Duration) {
        for observer in &self.inner.observers {
            observer.on_failure(event, error, elapsed);
        }
    }
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("config", &self.inner.config)
            .field("observers", &self.inner.observers.len())
            .finish_non_exhaustive()
    }
}
