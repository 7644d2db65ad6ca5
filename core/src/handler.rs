//! Handler contracts.
//!
//! Trait methods return boxed futures rather than using `async fn` so the
//! traits stay dyn-compatible: the registry stores handlers as trait
//! objects.

use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::message::Request;
use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;

/// What a request handler (or the rest of a pipeline) produces.
///
/// `Ok(None)` is a completion without a result: fine for commands, an error
/// for queries.
pub type Reply<T> = Result<Option<T>, DispatchError>;

/// Handles one request type.
///
/// # Example
///
/// ```ignore
/// struct PlaceOrderHandler {
///     orders: Arc<OrderBook>,
/// }
///
/// impl RequestHandler<PlaceOrder> for PlaceOrderHandler {
///     fn handle<'a>(
///         &'a self,
///         request: PlaceOrder,
///         _ctx: &'a DispatchContext,
///     ) -> BoxFuture<'a, Reply<OrderId>> {
///         Box::pin(async move { Ok(Some(self.orders.place(request).await?)) })
///     }
/// }
/// ```
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    /// Handle the request.
    fn handle<'a>(&'a self, request: R, ctx: &'a DispatchContext) -> BoxFuture<'a, Reply<R::Response>>;
}

/// Handles every notification that can be viewed as `T`.
///
/// `T` is a concrete notification, one of its base types, or an interface
/// such as `dyn Trackable`; the handler fires for every published
/// notification whose lattice contains `T`.
pub trait NotificationHandler<T: ?Sized + 'static>: Send + Sync + 'static {
    /// Handle the notification.
    fn handle<'a>(&'a self, notification: &'a T, ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// A [`RequestHandler`] backed by an async closure.
///
/// Created with [`handler_fn`].
pub struct HandlerFn<F, R> {
    f: F,
    _request: PhantomData<fn(R)>,
}

/// Turn an async closure into a [`RequestHandler`].
///
/// The closure receives the request and an owned clone of the context.
///
/// ```
/// use switchyard_core::handler::{handler_fn, RequestHandler};
/// use switchyard_core::message::{Message, Request};
///
/// struct Ping;
/// impl Message for Ping {}
/// impl Request for Ping {
///     type Response = &'static str;
/// }
///
/// let handler = handler_fn(|_ping: Ping, _ctx| async { Ok(Some("pong")) });
/// # fn assert_handler<H: RequestHandler<Ping>>(_: &H) {}
/// # assert_handler(&handler);
/// ```
pub const fn handler_fn<R, F, Fut>(f: F) -> HandlerFn<F, R>
where
    R: Request,
    F: Fn(R, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply<R::Response>> + Send + 'static,
{
    HandlerFn {
        f,
        _request: PhantomData,
    }
}

impl<R, F, Fut> RequestHandler<R> for HandlerFn<F, R>
where
    R: Request,
    F: Fn(R, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply<R::Response>> + Send + 'static,
{
    fn handle<'a>(&'a self, request: R, ctx: &'a DispatchContext) -> BoxFuture<'a, Reply<R::Response>> {
        Box::pin((self.f)(request, ctx.clone()))
    }
}
