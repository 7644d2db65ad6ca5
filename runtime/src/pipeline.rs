//! Request pipeline executor.
//!
//! One dispatch: build the handler, build and order the applicable
//! middleware, compose them innermost-out around the handler and run the
//! chain against the dispatch's cancellation token.

use crate::binding::{ErasedRequestHandler, RequestBinding};
use crate::middleware::{build_stages, Stage};
use crate::registry::RequestEntry;
use futures::future::BoxFuture;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::DispatchError;
use switchyard_core::pipeline::{AnyReply, AnyRequest, ErasedNext, PipelineBehavior, RequestInfo};

/// Runs request pipelines. Holds no state between dispatches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Create an executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run `request` through the middleware of `entry` into `binding`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Cancelled`] if the token is cancelled before or
    ///   during the dispatch
    /// - [`DispatchError::HandlerConstruction`] or
    ///   [`DispatchError::MiddlewareConstruction`] if a component cannot be
    ///   built; the handler is not invoked
    /// - whatever a middleware or the handler fails with, unchanged
    pub async fn execute(
        &self,
        request: AnyRequest,
        binding: &RequestBinding,
        entry: &RequestEntry,
        ctx: &DispatchContext,
    ) -> AnyReply {
        ctx.check_cancelled()?;

        let handler = binding.construct(ctx.resolver())?;
        let stages = build_stages(entry.middleware(), ctx.resolver())?;
        tracing::trace!(
            handler = binding.name(),
            stages = stages.len(),
            "Composed request pipeline"
        );

        let chain = compose(&stages, entry.info(), &*handler, binding.name(), ctx);
        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(DispatchError::Cancelled),
            reply = chain.run(request) => reply,
        }
    }
}

fn compose<'a>(
    stages: &'a [Stage<dyn PipelineBehavior>],
    info: &'a RequestInfo,
    handler: &'a dyn ErasedRequestHandler,
    handler_name: &'static str,
    ctx: &'a DispatchContext,
) -> ErasedNext<'a> {
    let terminal = ErasedNext::new(move |request: AnyRequest| -> BoxFuture<'a, AnyReply> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            tracing::trace!(handler = handler_name, "Invoking request handler");
            handler.call(request, ctx).await
        })
    });

    stages.iter().rev().fold(terminal, |next, stage| {
        ErasedNext::new(move |request: AnyRequest| -> BoxFuture<'a, AnyReply> {
            Box::pin(async move {
                ctx.check_cancelled()?;
                tracing::trace!(
                    middleware = stage.name(),
                    order = stage.placement.order,
                    "Entering request middleware"
                );
                stage.instance.handle(request, info, next, ctx).await
            })
        })
    })
}
