//! Handler bindings: a registered handler with its type erased.
//!
//! A binding knows how to obtain a handler instance (run the factory, or hand
//! out the shared instance) and how to call it with a type-erased message.

use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::{ConstructionError, DispatchError};
use switchyard_core::handler::{NotificationHandler, RequestHandler};
use switchyard_core::lattice::TypeKey;
use switchyard_core::message::Request;
use switchyard_core::pipeline::{box_reply, downcast_request, AnyReply, AnyRequest};
use switchyard_core::publish::NotificationRef;
use switchyard_core::resolver::Resolver;

/// How long a handler instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Built by its factory on every dispatch
    Transient,
    /// One shared instance
    Singleton,
}

/// Identity used to deduplicate notification handlers.
///
/// Two registrations are the same handler when they share the handler type
/// and, for shared instances, the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    handler: TypeKey,
    instance: Option<usize>,
}

impl HandlerId {
    fn of<H: 'static>(instance: Option<&Arc<H>>) -> Self {
        Self {
            handler: TypeKey::of::<H>(),
            instance: instance.map(|instance| Arc::as_ptr(instance).cast::<()>() as usize),
        }
    }

    /// The handler type.
    #[must_use]
    pub const fn handler(&self) -> TypeKey {
        self.handler
    }
}

type HandlerFactory<H> = Arc<dyn Fn(&dyn Resolver) -> Result<H, ConstructionError> + Send + Sync>;

enum Source<H> {
    Factory(HandlerFactory<H>),
    Instance(Arc<H>),
}

impl<H> Source<H> {
    fn get(&self, resolver: &dyn Resolver) -> Result<Arc<H>, ConstructionError> {
        match self {
            Self::Factory(factory) => factory(resolver).map(Arc::new),
            Self::Instance(instance) => Ok(Arc::clone(instance)),
        }
    }

    const fn lifetime(&self) -> Lifetime {
        match self {
            Self::Factory(_) => Lifetime::Transient,
            Self::Instance(_) => Lifetime::Singleton,
        }
    }
}

/// A constructed request handler, called with an erased request.
pub(crate) trait ErasedRequestHandler: Send + Sync {
    fn call<'a>(&'a self, request: AnyRequest, ctx: &'a DispatchContext) -> BoxFuture<'a, AnyReply>;
}

trait RequestSlot: Send + Sync {
    fn construct(&self, resolver: &dyn Resolver) -> Result<Box<dyn ErasedRequestHandler>, ConstructionError>;
}

struct Bound<M: ?Sized, H> {
    handler: Arc<H>,
    _message: PhantomData<fn(&M)>,
}

impl<R, H> ErasedRequestHandler for Bound<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    fn call<'a>(&'a self, request: AnyRequest, ctx: &'a DispatchContext) -> BoxFuture<'a, AnyReply> {
        Box::pin(async move {
            let request = downcast_request::<R>(request, std::any::type_name::<H>())?;
            box_reply(self.handler.handle(request, ctx).await)
        })
    }
}

struct Registered<M: ?Sized, H> {
    source: Source<H>,
    _message: PhantomData<fn(&M)>,
}

impl<R, H> RequestSlot for Registered<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    fn construct(&self, resolver: &dyn Resolver) -> Result<Box<dyn ErasedRequestHandler>, ConstructionError> {
        Ok(Box::new(Bound::<R, H> {
            handler: self.source.get(resolver)?,
            _message: PhantomData,
        }))
    }
}

/// A registered request handler.
#[derive(Clone)]
pub struct RequestBinding {
    name: &'static str,
    id: HandlerId,
    lifetime: Lifetime,
    slot: Arc<dyn RequestSlot>,
}

impl RequestBinding {
    pub(crate) fn factory<R, H, F>(factory: F) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn(&dyn Resolver) -> Result<H, ConstructionError> + Send + Sync + 'static,
    {
        Self::from_source::<R, H>(Source::Factory(Arc::new(factory)))
    }

    pub(crate) fn instance<R, H>(instance: Arc<H>) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        Self::from_source::<R, H>(Source::Instance(instance))
    }

    fn from_source<R, H>(source: Source<H>) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let id = match &source {
            Source::Factory(_) => HandlerId::of::<H>(None),
            Source::Instance(instance) => HandlerId::of::<H>(Some(instance)),
        };
        Self {
            name: std::any::type_name::<H>(),
            id,
            lifetime: source.lifetime(),
            slot: Arc::new(Registered::<R, H> {
                source,
                _message: PhantomData,
            }),
        }
    }

    /// Handler type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Handler identity.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Instance lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub(crate) fn construct(&self, resolver: &dyn Resolver) -> Result<Box<dyn ErasedRequestHandler>, DispatchError> {
        self.slot
            .construct(resolver)
            .map_err(|source| DispatchError::HandlerConstruction {
                handler: self.name,
                source,
            })
    }
}

impl fmt::Debug for RequestBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBinding")
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// A constructed notification handler, called with a borrowed notification.
pub(crate) trait ErasedNotificationHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        notification: NotificationRef<'a>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>>;
}

trait NotificationSlot: Send + Sync {
    fn construct(&self, resolver: &dyn Resolver) -> Result<Box<dyn ErasedNotificationHandler>, ConstructionError>;
}

impl<T, H> ErasedNotificationHandler for Bound<T, H>
where
    T: ?Sized + 'static,
    H: NotificationHandler<T>,
{
    fn call<'a>(
        &'a self,
        notification: NotificationRef<'a>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        match notification.view::<T>() {
            Some(view) => self.handler.handle(view, ctx),
            None => Box::pin(futures::future::ready(Err(DispatchError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                stage: std::any::type_name::<H>(),
            }))),
        }
    }
}

impl<T, H> NotificationSlot for Registered<T, H>
where
    T: ?Sized + 'static,
    H: NotificationHandler<T>,
{
    fn construct(&self, resolver: &dyn Resolver) -> Result<Box<dyn ErasedNotificationHandler>, ConstructionError> {
        Ok(Box::new(Bound::<T, H> {
            handler: self.source.get(resolver)?,
            _message: PhantomData,
        }))
    }
}

/// A registered notification handler.
#[derive(Clone)]
pub struct NotificationBinding {
    name: &'static str,
    id: HandlerId,
    lifetime: Lifetime,
    registered_for: TypeKey,
    slot: Arc<dyn NotificationSlot>,
}

impl NotificationBinding {
    pub(crate) fn factory<T, H, F>(factory: F) -> Self
    where
        T: ?Sized + 'static,
        H: NotificationHandler<T>,
        F: Fn(&dyn Resolver) -> Result<H, ConstructionError> + Send + Sync + 'static,
    {
        Self::from_source::<T, H>(Source::Factory(Arc::new(factory)))
    }

    pub(crate) fn instance<T, H>(instance: Arc<H>) -> Self
    where
        T: ?Sized + 'static,
        H: NotificationHandler<T>,
    {
        Self::from_source::<T, H>(Source::Instance(instance))
    }

    fn from_source<T, H>(source: Source<H>) -> Self
    where
        T: ?Sized + 'static,
        H: NotificationHandler<T>,
    {
        let id = match &source {
            Source::Factory(_) => HandlerId::of::<H>(None),
            Source::Instance(instance) => HandlerId::of::<H>(Some(instance)),
        };
        Self {
            name: std::any::type_name::<H>(),
            id,
            lifetime: source.lifetime(),
            registered_for: TypeKey::of::<T>(),
            slot: Arc::new(Registered::<T, H> {
                source,
                _message: PhantomData,
            }),
        }
    }

    /// Handler type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Handler identity.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Instance lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// The notification type, base type or interface this handler was
    /// registered for.
    #[must_use]
    pub const fn registered_for(&self) -> TypeKey {
        self.registered_for
    }

    pub(crate) fn construct(
        &self,
        resolver: &dyn Resolver,
    ) -> Result<Box<dyn ErasedNotificationHandler>, DispatchError> {
        self.slot
            .construct(resolver)
            .map_err(|source| DispatchError::HandlerConstruction {
                handler: self.name,
                source,
            })
    }
}

impl fmt::Debug for NotificationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBinding")
            .field("name", &self.name)
            .field("registered_for", &self.registered_for)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::handler::{handler_fn, Reply};
    use switchyard_core::message::{Message, Notification};
    use switchyard_core::pipeline::downcast_response;
    use switchyard_core::resolver::ServiceMap;

    struct Greet(String);
    impl Message for Greet {}
    impl Request for Greet {
        type Response = String;
    }

    struct Greeter {
        greeting: Arc<String>,
    }

    impl RequestHandler<Greet> for Greeter {
        fn handle<'a>(&'a self, request: Greet, _ctx: &'a DispatchContext) -> BoxFuture<'a, Reply<String>> {
            Box::pin(async move { Ok(Some(format!("{} {}", self.greeting, request.0))) })
        }
    }

    struct Joined;
    impl Message for Joined {}
    impl Notification for Joined {}

    struct Welcome;
    impl NotificationHandler<Joined> for Welcome {
        fn handle<'a>(&'a self, _notification: &'a Joined, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), DispatchError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_factory_binding_resolves_dependencies() {
        let binding = RequestBinding::factory::<Greet, _, _>(|resolver: &dyn Resolver| {
            Ok(Greeter {
                greeting: resolver.resolve::<String>()?,
            })
        });
        assert_eq!(binding.lifetime(), Lifetime::Transient);

        let services = ServiceMap::new().with("Hello".to_string());
        let ctx = DispatchContext::detached();
        let handler = binding.construct(&services).unwrap();
        let reply = handler.call(Box::new(Greet("Ada".to_string())), &ctx).await.unwrap();
        let response = downcast_response::<String>(reply.unwrap(), "test").unwrap();
        assert_eq!(response, "Hello Ada");

        let missing = binding.construct(&ServiceMap::new()).err().unwrap();
        assert!(matches!(missing, DispatchError::HandlerConstruction { .. }));
    }

    #[test]
    fn test_instance_identity_tracks_the_instance() {
        let shared = Arc::new(Welcome);
        let first = NotificationBinding::instance::<Joined, _>(Arc::clone(&shared));
        let again = NotificationBinding::instance::<Joined, _>(Arc::clone(&shared));
        let other = NotificationBinding::instance::<Joined, _>(Arc::new(Welcome));

        assert_eq!(first.id(), again.id());
        assert_ne!(first.id(), other.id());
        assert_eq!(first.lifetime(), Lifetime::Singleton);
        assert_eq!(first.registered_for(), TypeKey::of::<Joined>());
    }

    #[test]
    fn test_closure_handlers_register_as_instances() {
        let binding = RequestBinding::instance::<Greet, _>(Arc::new(handler_fn(|request: Greet, _ctx| async move {
            Ok(Some(request.0))
        })));
        assert!(binding.name().contains("HandlerFn"));
    }
}
