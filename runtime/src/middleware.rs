//! Middleware descriptors: what to build, when it applies, where it runs.
//!
//! A descriptor is registered once and kept in the frozen registry. It holds
//! a factory rather than an instance so middleware can be built per dispatch
//! from the resolver, optionally with a configuration object attached at
//! registration.
//!
//! Applicability is decided from static facts only (the request's
//! [`RequestInfo`] or the notification's [`TypeLattice`]), so it is computed
//! once at build time. Ordering needs the instance (`order()`), so it is
//! resolved on every dispatch.

use serde::Serialize;
use smallvec::{smallvec, SmallVec};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use switchyard_core::error::{ConstructionError, DispatchError};
use switchyard_core::lattice::{TypeKey, TypeLattice};
use switchyard_core::message::{Request, RequestKind};
use switchyard_core::pipeline::{
    PipelineBehavior, RequestInfo, RequestMiddleware, TypedMiddleware, FALLBACK_ORDER,
};
use switchyard_core::publish::NotificationMiddleware;
use switchyard_core::resolver::Resolver;

/// What a middleware factory is given.
#[derive(Clone, Copy)]
pub struct Setup<'a> {
    resolver: &'a dyn Resolver,
    config: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> Setup<'a> {
    /// A setup with no attached configuration.
    #[must_use]
    pub const fn new(resolver: &'a dyn Resolver) -> Self {
        Self {
            resolver,
            config: None,
        }
    }

    const fn with_config(resolver: &'a dyn Resolver, config: Option<&'a (dyn Any + Send + Sync)>) -> Self {
        Self { resolver, config }
    }

    /// The resolver of the current dispatch.
    #[must_use]
    pub const fn resolver(&self) -> &'a dyn Resolver {
        self.resolver
    }

    /// Look up a service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::MissingDependency`] when no `T` is
    /// registered.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ConstructionError> {
        self.resolver.resolve::<T>()
    }

    /// The configuration attached at registration, if it is a `T`.
    #[must_use]
    pub fn config<T: 'static>(&self) -> Option<&'a T> {
        self.config.and_then(|config| config.downcast_ref::<T>())
    }

    /// The configuration attached at registration.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::Failed`] when no `T` was attached.
    pub fn require_config<T: 'static>(&self) -> Result<&'a T, ConstructionError> {
        self.config::<T>().ok_or_else(|| {
            ConstructionError::Failed(format!(
                "no configuration of type {} attached",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl fmt::Debug for Setup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("has_config", &self.config.is_some())
            .finish_non_exhaustive()
    }
}

type Factory<M> = Arc<dyn Fn(Setup<'_>) -> Result<Arc<M>, ConstructionError> + Send + Sync>;

fn factory<M, F>(f: F) -> Factory<M>
where
    M: ?Sized,
    F: Fn(Setup<'_>) -> Result<Arc<M>, ConstructionError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which requests a middleware targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Every request
    Any,
    /// Exactly one request type
    Exact(TypeKey),
    /// Requests whose lattice contains every listed type
    Implements(SmallVec<[TypeKey; 2]>),
}

/// Full applicability rule of a request middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConstraint {
    /// Which requests
    pub target: RequestTarget,
    /// Required response type
    pub response: Option<TypeKey>,
    /// Required request kind
    pub kind: Option<RequestKind>,
}

impl RequestConstraint {
    /// A constraint every request satisfies.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            target: RequestTarget::Any,
            response: None,
            kind: None,
        }
    }

    /// Whether a request described by `info` satisfies this constraint.
    #[must_use]
    pub fn admits(&self, info: &RequestInfo) -> bool {
        let target = match &self.target {
            RequestTarget::Any => true,
            RequestTarget::Exact(key) => *key == info.request(),
            RequestTarget::Implements(keys) => keys.iter().all(|key| info.implements(*key)),
        };
        target
            && self.response.is_none_or(|response| response == info.response())
            && self.kind.is_none_or(|kind| kind == info.kind())
    }
}

/// Registration of one request middleware.
#[derive(Clone)]
pub struct MiddlewareDescriptor {
    name: &'static str,
    order: Option<i32>,
    config: Option<Arc<dyn Any + Send + Sync>>,
    constraint: RequestConstraint,
    factory: Factory<dyn PipelineBehavior>,
}

impl MiddlewareDescriptor {
    /// Open middleware built per dispatch by `factory`.
    pub fn open<M, F>(build: F) -> Self
    where
        M: PipelineBehavior,
        F: Fn(Setup<'_>) -> Result<M, ConstructionError> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<M>(),
            order: None,
            config: None,
            constraint: RequestConstraint::any(),
            factory: factory(move |setup| Ok(Arc::new(build(setup)?) as Arc<dyn PipelineBehavior>)),
        }
    }

    /// Open middleware shared by every dispatch.
    pub fn open_instance<M: PipelineBehavior>(instance: Arc<M>) -> Self {
        Self {
            name: std::any::type_name::<M>(),
            order: None,
            config: None,
            constraint: RequestConstraint::any(),
            factory: factory(move |_| Ok(Arc::clone(&instance) as Arc<dyn PipelineBehavior>)),
        }
    }

    /// Middleware closed over request type `R`, built per dispatch.
    pub fn typed<R, M, F>(build: F) -> Self
    where
        R: Request,
        M: RequestMiddleware<R>,
        F: Fn(Setup<'_>) -> Result<M, ConstructionError> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<M>(),
            order: None,
            config: None,
            constraint: RequestConstraint {
                target: RequestTarget::Exact(TypeKey::of::<R>()),
                ..RequestConstraint::any()
            },
            factory: factory(move |setup| {
                Ok(Arc::new(TypedMiddleware::<R, M>::new(build(setup)?)) as Arc<dyn PipelineBehavior>)
            }),
        }
    }

    /// Middleware closed over request type `R`, shared by every dispatch.
    pub fn typed_instance<R, M>(instance: Arc<M>) -> Self
    where
        R: Request,
        M: RequestMiddleware<R>,
    {
        let mut descriptor = Self::typed::<R, Arc<M>, _>(move |_| Ok(Arc::clone(&instance)));
        descriptor.name = std::any::type_name::<M>();
        descriptor
    }

    /// Pin the order, overriding the instance's `order()`.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Attach a configuration object handed to the factory.
    #[must_use]
    pub fn with_config<C: Send + Sync + 'static>(mut self, config: C) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Only apply to requests that can be viewed as `T`, typically a
    /// marker interface. Repeatable; every listed type is required.
    ///
    /// Has no effect on typed middleware, whose request type is fixed.
    #[must_use]
    pub fn implementing<T: ?Sized + 'static>(mut self) -> Self {
        let key = TypeKey::of::<T>();
        if let RequestTarget::Implements(keys) = &mut self.constraint.target {
            keys.push(key);
        } else if self.constraint.target == RequestTarget::Any {
            self.constraint.target = RequestTarget::Implements(smallvec![key]);
        }
        self
    }

    /// Only apply to requests whose response type is `T`.
    #[must_use]
    pub fn for_response<T: 'static>(mut self) -> Self {
        self.constraint.response = Some(TypeKey::of::<T>());
        self
    }

    /// Only apply to requests without a result (response `()`).
    #[must_use]
    pub fn without_response(self) -> Self {
        self.for_response::<()>()
    }

    /// Only apply to commands.
    #[must_use]
    pub const fn only_commands(mut self) -> Self {
        self.constraint.kind = Some(RequestKind::Command);
        self
    }

    /// Only apply to queries.
    #[must_use]
    pub const fn only_queries(mut self) -> Self {
        self.constraint.kind = Some(RequestKind::Query);
        self
    }

    /// Middleware type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The order pinned at registration.
    #[must_use]
    pub const fn registered_order(&self) -> Option<i32> {
        self.order
    }

    /// The applicability rule.
    #[must_use]
    pub const fn constraint(&self) -> &RequestConstraint {
        &self.constraint
    }

    /// Whether this middleware wraps requests described by `info`.
    #[must_use]
    pub fn applies_to(&self, info: &RequestInfo) -> bool {
        self.constraint.admits(info)
    }

    /// Build an instance.
    ///
    /// # Errors
    ///
    /// Returns the factory's [`ConstructionError`].
    pub fn construct(&self, resolver: &dyn Resolver) -> Result<Arc<dyn PipelineBehavior>, ConstructionError> {
        (self.factory)(Setup::with_config(resolver, self.config.as_deref()))
    }
}

impl fmt::Debug for MiddlewareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareDescriptor")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("constraint", &self.constraint)
            .field("has_config", &self.config.is_some())
            .finish_non_exhaustive()
    }
}

/// Registration of one notification middleware.
#[derive(Clone)]
pub struct NotificationMiddlewareDescriptor {
    name: &'static str,
    order: Option<i32>,
    config: Option<Arc<dyn Any + Send + Sync>>,
    implements: SmallVec<[TypeKey; 2]>,
    factory: Factory<dyn NotificationMiddleware>,
}

impl NotificationMiddlewareDescriptor {
    /// Middleware built per handler invocation by `factory`.
    pub fn new<M, F>(build: F) -> Self
    where
        M: NotificationMiddleware,
        F: Fn(Setup<'_>) -> Result<M, ConstructionError> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<M>(),
            order: None,
            config: None,
            implements: SmallVec::new(),
            factory: factory(move |setup| Ok(Arc::new(build(setup)?) as Arc<dyn NotificationMiddleware>)),
        }
    }

    /// Middleware shared by every invocation.
    pub fn instance<M: NotificationMiddleware>(instance: Arc<M>) -> Self {
        Self {
            name: std::any::type_name::<M>(),
            order: None,
            config: None,
            implements: SmallVec::new(),
            factory: factory(move |_| Ok(Arc::clone(&instance) as Arc<dyn NotificationMiddleware>)),
        }
    }

    /// Pin the order, overriding the instance's `order()`.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Attach a configuration object handed to the factory.
    #[must_use]
    pub fn with_config<C: Send + Sync + 'static>(mut self, config: C) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Only apply to notifications that can be viewed as `T`.
    #[must_use]
    pub fn implementing<T: ?Sized + 'static>(mut self) -> Self {
        self.implements.push(TypeKey::of::<T>());
        self
    }

    /// Middleware type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The order pinned at registration.
    #[must_use]
    pub const fn registered_order(&self) -> Option<i32> {
        self.order
    }

    /// Whether this middleware wraps handlers of a notification with this
    /// lattice.
    #[must_use]
    pub fn applies_to(&self, lattice: &TypeLattice) -> bool {
        self.implements.iter().all(|key| lattice.contains(*key))
    }

    /// Build an instance.
    ///
    /// # Errors
    ///
    /// Returns the factory's [`ConstructionError`].
    pub fn construct(&self, resolver: &dyn Resolver) -> Result<Arc<dyn NotificationMiddleware>, ConstructionError> {
        (self.factory)(Setup::with_config(resolver, self.config.as_deref()))
    }
}

impl fmt::Debug for NotificationMiddlewareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationMiddlewareDescriptor")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("implements", &self.implements)
            .finish_non_exhaustive()
    }
}

/// Where a stage's order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// Pinned at registration
    Registered,
    /// Reported by the instance's `order()`
    Declared,
    /// `order()` failed; placed innermost
    Fallback,
}

/// A middleware as placed in a resolved chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStage {
    /// Middleware type name
    pub name: &'static str,
    /// Effective order
    pub order: i32,
    /// Where the order came from
    pub source: OrderSource,
}

/// A constructed middleware ready to be composed.
pub(crate) struct Stage<M: ?Sized> {
    pub(crate) placement: PipelineStage,
    pub(crate) instance: Arc<M>,
}

impl<M: ?Sized> Stage<M> {
    pub(crate) const fn name(&self) -> &'static str {
        self.placement.name
    }
}

pub(crate) fn resolve_order(
    name: &'static str,
    registered: Option<i32>,
    declared: impl FnOnce() -> Result<i32, DispatchError>,
) -> (i32, OrderSource) {
    if let Some(order) = registered {
        return (order, OrderSource::Registered);
    }
    match declared() {
        Ok(order) => (order, OrderSource::Declared),
        Err(error) => {
            tracing::warn!(
                middleware = name,
                error = %error,
                fallback = FALLBACK_ORDER,
                "Middleware order could not be resolved, running it innermost"
            );
            (FALLBACK_ORDER, OrderSource::Fallback)
        }
    }
}

/// A descriptor that can be turned into a [`Stage`].
pub(crate) trait StageSource {
    type Instance: ?Sized;

    fn name(&self) -> &'static str;

    fn registered_order(&self) -> Option<i32>;

    fn construct(&self, resolver: &dyn Resolver) -> Result<Arc<Self::Instance>, ConstructionError>;

    fn declared_order(instance: &Self::Instance) -> Result<i32, DispatchError>;
}

impl StageSource for MiddlewareDescriptor {
    type Instance = dyn PipelineBehavior;

    fn name(&self) -> &'static str {
        MiddlewareDescriptor::name(self)
    }

    fn registered_order(&self) -> Option<i32> {
        self.order
    }

    fn construct(&self, resolver: &dyn Resolver) -> Result<Arc<Self::Instance>, ConstructionError> {
        MiddlewareDescriptor::construct(self, resolver)
    }

    fn declared_order(instance: &Self::Instance) -> Result<i32, DispatchError> {
        instance.order()
    }
}

impl StageSource for NotificationMiddlewareDescriptor {
    type Instance = dyn NotificationMiddleware;

    fn name(&self) -> &'static str {
        NotificationMiddlewareDescriptor::name(self)
    }

    fn registered_order(&self) -> Option<i32> {
        self.order
    }

    fn construct(&self, resolver: &dyn Resolver) -> Result<Arc<Self::Instance>, ConstructionError> {
        NotificationMiddlewareDescriptor::construct(self, resolver)
    }

    fn declared_order(instance: &Self::Instance) -> Result<i32, DispatchError> {
        instance.order()
    }
}

/// Build and order every applicable middleware.
pub(crate) fn build_stages<D: StageSource>(
    descriptors: &[D],
    resolver: &dyn Resolver,
) -> Result<Vec<Stage<D::Instance>>, DispatchError> {
    let mut stages = descriptors
        .iter()
        .map(|descriptor| {
            let instance = descriptor
                .construct(resolver)
                .map_err(|source| DispatchError::MiddlewareConstruction {
                    middleware: descriptor.name(),
                    source,
                })?;
            let (order, source) = resolve_order(descriptor.name(), descriptor.registered_order(), || {
                D::declared_order(&*instance)
            });
            Ok(Stage {
                placement: PipelineStage {
                    name: descriptor.name(),
                    order,
                    source,
                },
                instance,
            })
        })
        .collect::<Result<Vec<_>, DispatchError>>()?;
    // Stable: equal orders keep registration order.
    stages.sort_by_key(|stage| stage.placement.order);
    Ok(stages)
}
