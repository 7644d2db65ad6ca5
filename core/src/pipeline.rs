//! Request middleware contracts and the type-erased pipeline they run in.
//!
//! A request pipeline is a chain of stages ending in the handler. Inside the
//! chain the request and the response travel type-erased
//! ([`AnyRequest`], [`AnyReply`]) so one descriptor table can hold both
//! open middleware ([`PipelineBehavior`], applicable to many request types)
//! and closed middleware ([`RequestMiddleware`], written against one request
//! type and adapted by [`TypedMiddleware`]).
//!
//! ```text
//!   caller ──► M(order 5) ──► M(order 10) ──► handler
//!          ◄──            ◄──             ◄──
//! ```

use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::handler::Reply;
use crate::lattice::{TypeKey, TypeLattice};
use crate::message::{Request, RequestKind};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Order of a middleware that does not declare one.
pub const DEFAULT_ORDER: i32 = 0;

/// Order given to a middleware whose `order()` fails: it runs innermost.
pub const FALLBACK_ORDER: i32 = i32::MAX;

/// A request travelling through the pipeline.
pub type AnyRequest = Box<dyn Any + Send>;

/// A response travelling back through the pipeline.
pub type AnyResponse = Box<dyn Any + Send>;

/// The type-erased [`Reply`].
pub type AnyReply = Reply<AnyResponse>;

/// Static facts about a request type, computed once at registration.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    request: TypeKey,
    response: TypeKey,
    kind: RequestKind,
    lattice: TypeLattice,
}

impl RequestInfo {
    /// Describe request type `R`.
    #[must_use]
    pub fn of<R: Request>() -> Self {
        Self {
            request: TypeKey::of::<R>(),
            response: TypeKey::of::<R::Response>(),
            kind: R::KIND,
            lattice: TypeLattice::of::<R>(),
        }
    }

    /// The request type.
    #[must_use]
    pub const fn request(&self) -> TypeKey {
        self.request
    }

    /// The response type.
    #[must_use]
    pub const fn response(&self) -> TypeKey {
        self.response
    }

    /// Command or query.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The request's base types and marker interfaces.
    #[must_use]
    pub const fn lattice(&self) -> &TypeLattice {
        &self.lattice
    }

    /// Whether the request can be viewed as the type behind `key`.
    #[must_use]
    pub fn implements(&self, key: TypeKey) -> bool {
        self.lattice.contains(key)
    }

    /// View an in-flight request as `T`, typically a marker interface.
    ///
    /// ```ignore
    /// if let Some(audited) = info.view::<dyn Auditable>(&request) {
    ///     audit_log.record(audited.actor());
    /// }
    /// ```
    #[must_use]
    pub fn view<'r, T: ?Sized + 'static>(&self, request: &'r AnyRequest) -> Option<&'r T> {
        self.lattice.view::<T>(&**request)
    }
}

/// The rest of the pipeline after the current stage.
///
/// Running it consumes it, so a stage can forward the request at most once.
pub struct ErasedNext<'a> {
    stage: Box<dyn FnOnce(AnyRequest) -> BoxFuture<'a, AnyReply> + Send + 'a>,
}

impl<'a> ErasedNext<'a> {
    /// Wrap the continuation of a pipeline.
    pub fn new(stage: impl FnOnce(AnyRequest) -> BoxFuture<'a, AnyReply> + Send + 'a) -> Self {
        Self {
            stage: Box::new(stage),
        }
    }

    /// Forward the request to the next stage.
    pub fn run(self, request: AnyRequest) -> BoxFuture<'a, AnyReply> {
        (self.stage)(request)
    }
}

impl fmt::Debug for ErasedNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErasedNext(<continuation>)")
    }
}

/// Open middleware, applicable to any request its descriptor admits.
///
/// The request arrives type-erased; use [`RequestInfo::view`] to inspect
/// marker interfaces or `downcast_mut` to rewrite a known request type.
pub trait PipelineBehavior: Send + Sync + 'static {
    /// Run this stage.
    fn handle<'a>(
        &'a self,
        request: AnyRequest,
        info: &'a RequestInfo,
        next: ErasedNext<'a>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, AnyReply>;

    /// Position in the chain; lower runs first (outermost).
    ///
    /// # Errors
    ///
    /// An error is not fatal: the middleware is placed at
    /// [`FALLBACK_ORDER`].
    fn order(&self) -> Result<i32, DispatchError> {
        Ok(DEFAULT_ORDER)
    }
}

/// Closed middleware written against one request type.
///
/// # Example
///
/// ```ignore
/// struct NormalizeSku;
///
/// impl RequestMiddleware<PlaceOrder> for NormalizeSku {
///     fn handle<'a>(
///         &'a self,
///         mut request: PlaceOrder,
///         next: Next<'a, PlaceOrder>,
///         _ctx: &'a DispatchContext,
///     ) -> BoxFuture<'a, Reply<OrderId>> {
///         request.sku = request.sku.to_uppercase();
///         next.run(request)
///     }
/// }
/// ```
pub trait RequestMiddleware<R: Request>: Send + Sync + 'static {
    /// Run this stage.
    fn handle<'a>(
        &'a self,
        request: R,
        next: Next<'a, R>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Reply<R::Response>>;

    /// Position in the chain; lower runs first (outermost).
    ///
    /// # Errors
    ///
    /// An error is not fatal: the middleware is placed at
    /// [`FALLBACK_ORDER`].
    fn order(&self) -> Result<i32, DispatchError> {
        Ok(DEFAULT_ORDER)
    }
}

impl<R: Request, M: RequestMiddleware<R>> RequestMiddleware<R> for Arc<M> {
    fn handle<'a>(
        &'a self,
        request: R,
        next: Next<'a, R>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Reply<R::Response>> {
        (**self).handle(request, next, ctx)
    }

    fn order(&self) -> Result<i32, DispatchError> {
        (**self).order()
    }
}

/// Typed view of [`ErasedNext`] handed to [`RequestMiddleware`].
pub struct Next<'a, R> {
    inner: ErasedNext<'a>,
    _request: PhantomData<fn(R)>,
}

impl<'a, R: Request> Next<'a, R> {
    /// Wrap an erased continuation.
    #[must_use]
    pub const fn from_erased(inner: ErasedNext<'a>) -> Self {
        Self {
            inner,
            _request: PhantomData,
        }
    }

    /// Forward the request to the next stage.
    pub fn run(self, request: R) -> BoxFuture<'a, Reply<R::Response>> {
        let pending = self.inner.run(Box::new(request));
        Box::pin(async move {
            let reply = pending.await?;
            reply.map(|response| downcast_response::<R::Response>(response, "next")).transpose()
        })
    }
}

impl<R> fmt::Debug for Next<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(<continuation>)")
    }
}

/// Adapts a [`RequestMiddleware`] to the erased pipeline.
pub struct TypedMiddleware<R, M> {
    inner: M,
    _request: PhantomData<fn(R)>,
}

impl<R, M> TypedMiddleware<R, M>
where
    R: Request,
    M: RequestMiddleware<R>,
{
    /// Wrap a typed middleware.
    #[must_use]
    pub const fn new(inner: M) -> Self {
        Self {
            inner,
            _request: PhantomData,
        }
    }

    /// The wrapped middleware.
    #[must_use]
    pub const fn inner(&self) -> &M {
        &self.inner
    }
}

impl<R, M> PipelineBehavior for TypedMiddleware<R, M>
where
    R: Request,
    M: RequestMiddleware<R>,
{
    fn handle<'a>(
        &'a self,
        request: AnyRequest,
        _info: &'a RequestInfo,
        next: ErasedNext<'a>,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, AnyReply> {
        Box::pin(async move {
            let request = downcast_request::<R>(request, std::any::type_name::<M>())?;
            let reply = self.inner.handle(request, Next::from_erased(next), ctx).await;
            box_reply(reply)
        })
    }

    fn order(&self) -> Result<i32, DispatchError> {
        self.inner.order()
    }
}

/// Recover a typed request from the pipeline.
///
/// # Errors
///
/// Returns [`DispatchError::TypeMismatch`] if an earlier stage replaced the
/// request with a value of another type.
pub fn downcast_request<R: Request>(request: AnyRequest, stage: &'static str) -> Result<R, DispatchError> {
    request
        .downcast::<R>()
        .map(|request| *request)
        .map_err(|_| DispatchError::TypeMismatch {
            expected: std::any::type_name::<R>(),
            stage,
        })
}

/// Recover a typed response from the pipeline.
///
/// # Errors
///
/// Returns [`DispatchError::TypeMismatch`] if a stage produced a response of
/// another type.
pub fn downcast_response<T: 'static>(response: AnyResponse, stage: &'static str) -> Result<T, DispatchError> {
    response
        .downcast::<T>()
        .map(|response| *response)
        .map_err(|_| DispatchError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            stage,
        })
}

/// Erase a typed reply.
///
/// # Errors
///
/// Passes the error of `reply` through unchanged.
pub fn box_reply<T: Send + 'static>(reply: Reply<T>) -> AnyReply {
    reply.map(|response| response.map(|value| Box::new(value) as AnyResponse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeBuilder;
    use crate::message::Message;

    trait Auditable: Send + Sync {
        fn actor(&self) -> &str;
    }

    struct Rename {
        actor: String,
        name: String,
    }

    impl Auditable for Rename {
        fn actor(&self) -> &str {
            &self.actor
        }
    }

    fn as_auditable(rename: &Rename) -> &(dyn Auditable + 'static) {
        rename
    }

    impl Message for Rename {
        fn describe(lattice: &mut LatticeBuilder<Self>) {
            lattice.implements::<dyn Auditable>(as_auditable);
        }
    }

    impl Request for Rename {
        type Response = String;
    }

    struct Uppercase;

    impl RequestMiddleware<Rename> for Uppercase {
        fn handle<'a>(
            &'a self,
            mut request: Rename,
            next: Next<'a, Rename>,
            _ctx: &'a DispatchContext,
        ) -> BoxFuture<'a, Reply<String>> {
            request.name = request.name.to_uppercase();
            Box::pin(async move {
                let reply = next.run(request).await?;
                Ok(reply.map(|name| format!("<{name}>")))
            })
        }

        fn order(&self) -> Result<i32, DispatchError> {
            Ok(7)
        }
    }

    fn echo_terminal<'a>() -> ErasedNext<'a> {
        ErasedNext::new(|request| {
            Box::pin(async move {
                let rename = downcast_request::<Rename>(request, "terminal")?;
                box_reply(Ok(Some(rename.name)))
            })
        })
    }

    #[tokio::test]
    async fn test_typed_middleware_transforms_request_and_response() {
        let middleware = TypedMiddleware::new(Uppercase);
        let info = RequestInfo::of::<Rename>();
        let ctx = DispatchContext::detached();
        let request: AnyRequest = Box::new(Rename {
            actor: "ops".to_string(),
            name: "widget".to_string(),
        });

        let reply = middleware.handle(request, &info, echo_terminal(), &ctx).await.unwrap();
        let response = downcast_response::<String>(reply.unwrap(), "test").unwrap();

        assert_eq!(response, "<WIDGET>");
        assert_eq!(PipelineBehavior::order(&middleware).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_wrong_request_type_is_a_mismatch() {
        let middleware = TypedMiddleware::new(Uppercase);
        let info = RequestInfo::of::<Rename>();
        let ctx = DispatchContext::detached();

        let reply = middleware.handle(Box::new(5_u8), &info, echo_terminal(), &ctx).await;
        assert!(matches!(reply, Err(DispatchError::TypeMismatch { .. })));
    }

    #[test]
    fn test_request_info_views_markers() {
        let info = RequestInfo::of::<Rename>();
        let request: AnyRequest = Box::new(Rename {
            actor: "ops".to_string(),
            name: "widget".to_string(),
        });

        assert_eq!(info.kind(), RequestKind::Command);
        assert_eq!(info.response(), TypeKey::of::<String>());
        assert!(info.implements(TypeKey::of::<dyn Auditable>()));
        assert_eq!(info.view::<dyn Auditable>(&request).map(Auditable::actor), Some("ops"));
    }
}
