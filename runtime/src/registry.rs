//! Handler registry: registration, the frozen lookup tables and their
//! query interface.
//!
//! Everything that can be decided without a message instance is decided in
//! [`RegistryBuilder::build`]: which middleware applies to each registered
//! request type, and which handlers a declared notification type fans out
//! to. After `build` the registry is immutable and read without locks.
//!
//! # Example
//!
//! ```ignore
//! let registry = RegistryBuilder::new()
//!     .request_handler::<PlaceOrder, _, _>(|resolver| {
//!         Ok(PlaceOrderHandler::new(resolver.resolve::<OrderBook>()?))
//!     })
//!     .notification_handler_instance::<dyn Trackable, _>(Arc::new(TrackingProjection::default()))
//!     .middleware(MiddlewareDescriptor::open(|_| Ok(Timing)).with_order(-10))
//!     .notification::<OrderShipped>()
//!     .install(BillingModule)
//!     .build();
//! ```

use crate::binding::{NotificationBinding, RequestBinding};
use crate::middleware::{
    build_stages, MiddlewareDescriptor, NotificationMiddlewareDescriptor, PipelineStage,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::{ConstructionError, DispatchError};
use switchyard_core::handler::{handler_fn, NotificationHandler, Reply, RequestHandler};
use switchyard_core::lattice::{TypeKey, TypeLattice};
use switchyard_core::message::{Notification, Request};
use switchyard_core::pipeline::RequestInfo;
use switchyard_core::resolver::Resolver;

/// A bundle of registrations installed together.
///
/// Modules replace assembly scanning: each feature exposes one module and
/// the application installs the modules it wants.
///
/// ```ignore
/// struct BillingModule;
///
/// impl RegistrationModule for BillingModule {
///     fn register(self, registry: RegistryBuilder) -> RegistryBuilder {
///         registry
///             .request_handler::<ChargeCard, _, _>(ChargeCardHandler::from_resolver)
///             .notification_handler::<OrderPlaced, _, _>(InvoiceWriter::from_resolver)
///     }
/// }
/// ```
pub trait RegistrationModule {
    /// Add this module's registrations.
    fn register(self, registry: RegistryBuilder) -> RegistryBuilder;
}

impl<F> RegistrationModule for F
where
    F: FnOnce(RegistryBuilder) -> RegistryBuilder,
{
    fn register(self, registry: RegistryBuilder) -> RegistryBuilder {
        self(registry)
    }
}

/// Collects registrations; [`build`](Self::build) freezes them.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    requests: Vec<(RequestInfo, Vec<RequestBinding>)>,
    request_index: HashMap<TypeKey, usize>,
    notification_handlers: Vec<NotificationBinding>,
    declared: Vec<TypeLattice>,
    middleware: Vec<MiddlewareDescriptor>,
    notification_middleware: Vec<NotificationMiddlewareDescriptor>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `R` built per dispatch by `factory`.
    #[must_use]
    pub fn request_handler<R, H, F>(self, factory: F) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn(&dyn Resolver) -> Result<H, ConstructionError> + Send + Sync + 'static,
    {
        self.push_request::<R>(RequestBinding::factory::<R, H, F>(factory))
    }

    /// Register a shared handler instance for `R`.
    #[must_use]
    pub fn request_handler_instance<R, H>(self, handler: Arc<H>) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.push_request::<R>(RequestBinding::instance::<R, H>(handler))
    }

    /// Register an async closure as the handler for `R`.
    #[must_use]
    pub fn request_fn<R, F, Fut>(self, f: F) -> Self
    where
        R: Request,
        F: Fn(R, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply<R::Response>> + Send + 'static,
    {
        self.request_handler_instance::<R, _>(Arc::new(handler_fn(f)))
    }

    fn push_request<R: Request>(mut self, binding: RequestBinding) -> Self {
        let key = TypeKey::of::<R>();
        let index = match self.request_index.get(&key) {
            Some(index) => *index,
            None => {
                self.requests.push((RequestInfo::of::<R>(), Vec::new()));
                let index = self.requests.len() - 1;
                self.request_index.insert(key, index);
                index
            }
        };
        if let Some((_, handlers)) = self.requests.get_mut(index) {
            handlers.push(binding);
        }
        self
    }

    /// Register a handler for every notification viewable as `T`, built
    /// per invocation by `factory`.
    ///
    /// `T` may be a concrete notification, a base type or an interface.
    #[must_use]
    pub fn notification_handler<T, H, F>(mut self, factory: F) -> Self
    where
        T: ?Sized + 'static,
        H: NotificationHandler<T>,
        F: Fn(&dyn Resolver) -> Result<H, ConstructionError> + Send + Sync + 'static,
    {
        self.notification_handlers
            .push(NotificationBinding::factory::<T, H, F>(factory));
        self
    }

    /// Register a shared handler instance for every notification viewable
    /// as `T`.
    #[must_use]
    pub fn notification_handler_instance<T, H>(mut self, handler: Arc<H>) -> Self
    where
        T: ?Sized + 'static,
        H: NotificationHandler<T>,
    {
        self.notification_handlers
            .push(NotificationBinding::instance::<T, H>(handler));
        self
    }

    /// Declare a notification type so its fan-out plan is computed at
    /// build time. Undeclared types are planned on each publish.
    #[must_use]
    pub fn notification<N: Notification>(mut self) -> Self {
        let key = TypeKey::of::<N>();
        if !self.declared.iter().any(|lattice| lattice.message() == key) {
            self.declared.push(TypeLattice::of::<N>());
        }
        self
    }

    /// Register a request middleware.
    #[must_use]
    pub fn middleware(mut self, descriptor: MiddlewareDescriptor) -> Self {
        self.middleware.push(descriptor);
        self
    }

    /// Register a notification middleware.
    #[must_use]
    pub fn notification_middleware(mut self, descriptor: NotificationMiddlewareDescriptor) -> Self {
        self.notification_middleware.push(descriptor);
        self
    }

    /// Install a registration module.
    #[must_use]
    pub fn install<M: RegistrationModule>(self, module: M) -> Self {
        tracing::debug!(module = std::any::type_name::<M>(), "Installing registration module");
        module.register(self)
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        let middleware = self.middleware;
        let requests: HashMap<TypeKey, RequestEntry> = self
            .requests
            .into_iter()
            .map(|(info, handlers)| {
                let applicable = middleware
                    .iter()
                    .filter(|descriptor| descriptor.applies_to(&info))
                    .cloned()
                    .collect();
                (
                    info.request(),
                    RequestEntry {
                        info,
                        handlers,
                        middleware: applicable,
                    },
                )
            })
            .collect();

        let mut by_key: HashMap<TypeKey, Vec<NotificationBinding>> = HashMap::new();
        for binding in self.notification_handlers {
            by_key.entry(binding.registered_for()).or_default().push(binding);
        }

        let plans: HashMap<TypeKey, Arc<FanoutPlan>> = self
            .declared
            .into_iter()
            .map(|lattice| {
                let plan = FanoutPlan::new(lattice, &by_key, &self.notification_middleware);
                (plan.notification(), Arc::new(plan))
            })
            .collect();

        let registry = HandlerRegistry {
            requests,
            notification_handlers: by_key,
            plans,
            middleware,
            notification_middleware: self.notification_middleware,
        };

        for ambiguous in registry.diagnostics().ambiguous {
            tracing::warn!(
                request = ambiguous.request,
                handlers = ?ambiguous.handlers,
                "Request type has more than one handler; dispatching it will fail"
            );
        }
        tracing::debug!(
            requests = registry.requests.len(),
            notification_keys = registry.notification_handlers.len(),
            plans = registry.plans.len(),
            middleware = registry.middleware.len(),
            "Handler registry built"
        );
        registry
    }
}

/// Everything registered for one request type.
#[derive(Debug, Clone)]
pub struct RequestEntry {
    info: RequestInfo,
    handlers: Vec<RequestBinding>,
    middleware: Vec<MiddlewareDescriptor>,
}

impl RequestEntry {
    /// Static facts about the request type.
    #[must_use]
    pub const fn info(&self) -> &RequestInfo {
        &self.info
    }

    /// Every registered handler, in registration order.
    #[must_use]
    pub fn handlers(&self) -> &[RequestBinding] {
        &self.handlers
    }

    /// Applicable middleware, in registration order.
    #[must_use]
    pub fn middleware(&self) -> &[MiddlewareDescriptor] {
        &self.middleware
    }

    /// The one handler a dispatch goes to.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::HandlerNotFound`] or
    /// [`DispatchError::AmbiguousHandler`] unless exactly one handler is
    /// registered.
    pub fn handler(&self) -> Result<&RequestBinding, DispatchError> {
        match self.handlers.as_slice() {
            [single] => Ok(single),
            [] => Err(DispatchError::HandlerNotFound {
                request: self.info.request().name(),
            }),
            many => Err(DispatchError::AmbiguousHandler {
                request: self.info.request().name(),
                handlers: many.iter().map(RequestBinding::name).collect(),
            }),
        }
    }
}

/// The handlers one notification type fans out to.
#[derive(Debug, Clone)]
pub struct FanoutPlan {
    lattice: TypeLattice,
    handlers: Vec<NotificationBinding>,
    middleware: Vec<NotificationMiddlewareDescriptor>,
}

impl FanoutPlan {
    /// Walk `lattice` and collect every compatible handler once.
    ///
    /// Handlers are visited exact type first, then bases nearest first,
    /// then interfaces; a handler reachable through several keys keeps its
    /// first position.
    pub(crate) fn new(
        lattice: TypeLattice,
        handlers: &HashMap<TypeKey, Vec<NotificationBinding>>,
        middleware: &[NotificationMiddlewareDescriptor],
    ) -> Self {
        let mut seen = HashSet::new();
        let matched = lattice
            .keys()
            .filter_map(|key| handlers.get(&key))
            .flatten()
            .filter(|binding| seen.insert(binding.id()))
            .cloned()
            .collect();
        let middleware = middleware
            .iter()
            .filter(|descriptor| descriptor.applies_to(&lattice))
            .cloned()
            .collect();
        Self {
            lattice,
            handlers: matched,
            middleware,
        }
    }

    /// The notification type.
    #[must_use]
    pub const fn notification(&self) -> TypeKey {
        self.lattice.message()
    }

    /// The notification's lattice.
    #[must_use]
    pub const fn lattice(&self) -> &TypeLattice {
        &self.lattice
    }

    /// Matched handlers in plan order.
    #[must_use]
    pub fn handlers(&self) -> &[NotificationBinding] {
        &self.handlers
    }

    /// Applicable notification middleware, in registration order.
    #[must_use]
    pub fn middleware(&self) -> &[NotificationMiddlewareDescriptor] {
        &self.middleware
    }

    /// Whether no handler matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A request type with more than one handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousRegistration {
    /// Request type name
    pub request: &'static str,
    /// Every registered handler
    pub handlers: Vec<&'static str>,
}

/// A notification handler no declared notification reaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreachableHandler {
    /// Handler type name
    pub handler: &'static str,
    /// The key it was registered for
    pub registered_for: &'static str,
}

/// Registration problems found by [`HandlerRegistry::diagnostics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryDiagnostics {
    /// Request types with more than one handler
    pub ambiguous: Vec<AmbiguousRegistration>,
    /// Request middleware that applies to no registered request type
    pub unused_middleware: Vec<&'static str>,
    /// Notification handlers outside every declared notification's lattice
    ///
    /// Handlers for notification types that are published without being
    /// declared show up here too.
    pub unreachable_handlers: Vec<UnreachableHandler>,
}

impl RegistryDiagnostics {
    /// Whether no problem was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.ambiguous.is_empty() && self.unused_middleware.is_empty() && self.unreachable_handlers.is_empty()
    }
}

/// The frozen registry.
#[derive(Debug)]
pub struct HandlerRegistry {
    requests: HashMap<TypeKey, RequestEntry>,
    notification_handlers: HashMap<TypeKey, Vec<NotificationBinding>>,
    plans: HashMap<TypeKey, Arc<FanoutPlan>>,
    middleware: Vec<MiddlewareDescriptor>,
    notification_middleware: Vec<NotificationMiddlewareDescriptor>,
}

impl HandlerRegistry {
    /// Start a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Everything registered for the request type behind `key`.
    #[must_use]
    pub fn request_entry(&self, key: TypeKey) -> Option<&RequestEntry> {
        self.requests.get(&key)
    }

    /// Every handler registered for the request type behind `key`.
    #[must_use]
    pub fn request_handlers(&self, key: TypeKey) -> &[RequestBinding] {
        self.requests.get(&key).map_or(&[][..], RequestEntry::handlers)
    }

    /// Every registered request type.
    pub fn request_types(&self) -> impl Iterator<Item = &RequestInfo> + '_ {
        self.requests.values().map(RequestEntry::info)
    }

    /// Handlers registered directly under `key`, without lattice expansion.
    #[must_use]
    pub fn handlers_registered_for(&self, key: TypeKey) -> &[NotificationBinding] {
        self.notification_handlers.get(&key).map_or(&[][..], Vec::as_slice)
    }

    /// The fan-out plan of `N`: precomputed if `N` was declared, computed
    /// now otherwise. Both paths give the same plan.
    #[must_use]
    pub fn fanout_plan<N: Notification>(&self) -> Arc<FanoutPlan> {
        let key = TypeKey::of::<N>();
        self.plans.get(&key).map_or_else(
            || {
                tracing::trace!(notification = key.name(), "Planning undeclared notification type");
                Arc::new(FanoutPlan::new(
                    TypeLattice::of::<N>(),
                    &self.notification_handlers,
                    &self.notification_middleware,
                ))
            },
            Arc::clone,
        )
    }

    /// Whether the plan of the type behind `key` was computed at build time.
    #[must_use]
    pub fn is_declared(&self, key: TypeKey) -> bool {
        self.plans.contains_key(&key)
    }

    /// Every handler publishing `N` would invoke, in plan order.
    #[must_use]
    pub fn notification_handlers<N: Notification>(&self) -> Vec<NotificationBinding> {
        self.fanout_plan::<N>().handlers().to_vec()
    }

    /// Middleware applicable to the registered request type behind `key`,
    /// in registration order. Unknown types have none.
    #[must_use]
    pub fn applicable_middleware(&self, key: TypeKey) -> &[MiddlewareDescriptor] {
        self.requests.get(&key).map_or(&[][..], RequestEntry::middleware)
    }

    /// Every registered request middleware.
    #[must_use]
    pub fn middleware(&self) -> &[MiddlewareDescriptor] {
        &self.middleware
    }

    /// Every registered notification middleware.
    #[must_use]
    pub fn notification_middleware(&self) -> &[NotificationMiddlewareDescriptor] {
        &self.notification_middleware
    }

    /// The middleware chain a dispatch of `R` would run, outermost first.
    ///
    /// Middleware is constructed through `resolver` to read its order, the
    /// same way a dispatch does.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MiddlewareConstruction`] if a middleware
    /// cannot be built.
    pub fn inspect_pipeline<R: Request>(&self, resolver: &dyn Resolver) -> Result<Vec<PipelineStage>, DispatchError> {
        let stages = match self.requests.get(&TypeKey::of::<R>()) {
            Some(entry) => build_stages(entry.middleware(), resolver)?,
            None => {
                let info = RequestInfo::of::<R>();
                let applicable: Vec<MiddlewareDescriptor> = self
                    .middleware
                    .iter()
                    .filter(|descriptor| descriptor.applies_to(&info))
                    .cloned()
                    .collect();
                build_stages(&applicable, resolver)?
            }
        };
        Ok(stages.iter().map(|stage| stage.placement).collect())
    }

    /// The middleware chain each handler of `N` would run in, outermost
    /// first.
    ///
    /// Reflects registration only. A mediator configured without
    /// notification middleware runs none of it; see
    /// [`Mediator::inspect_notification_pipeline`](crate::Mediator::inspect_notification_pipeline).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MiddlewareConstruction`] if a middleware
    /// cannot be built.
    pub fn inspect_notification_pipeline<N: Notification>(
        &self,
        resolver: &dyn Resolver,
    ) -> Result<Vec<PipelineStage>, DispatchError> {
        let plan = self.fanout_plan::<N>();
        let stages = build_stages(plan.middleware(), resolver)?;
        Ok(stages.iter().map(|stage| stage.placement).collect())
    }

    /// Look for registrations that can never work as intended.
    #[must_use]
    pub fn diagnostics(&self) -> RegistryDiagnostics {
        let mut ambiguous: Vec<AmbiguousRegistration> = self
            .requests
            .values()
            .filter(|entry| entry.handlers.len() > 1)
            .map(|entry| AmbiguousRegistration {
                request: entry.info.request().name(),
                handlers: entry.handlers.iter().map(RequestBinding::name).collect(),
            })
            .collect();
        ambiguous.sort_by_key(|registration| registration.request);

        let unused_middleware = self
            .middleware
            .iter()
            .filter(|descriptor| {
                !self
                    .requests
                    .values()
                    .any(|entry| descriptor.applies_to(&entry.info))
            })
            .map(MiddlewareDescriptor::name)
            .collect();

        let mut unreachable_handlers: Vec<UnreachableHandler> = self
            .notification_handlers
            .iter()
            .filter(|(key, _)| !self.plans.values().any(|plan| plan.lattice().contains(**key)))
            .flat_map(|(key, bindings)| {
                bindings.iter().map(|binding| UnreachableHandler {
                    handler: binding.name(),
                    registered_for: key.name(),
                })
            })
            .collect();
        unreachable_handlers.sort_by_key(|handler| (handler.registered_for, handler.handler));

        RegistryDiagnostics {
            ambiguous,
            unused_middleware,
            unreachable_handlers,
        }
    }
}
