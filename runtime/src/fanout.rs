//! Notification fan-out engine.
//!
//! Every handler in a [`FanoutPlan`] gets its own middleware chain and its
//! own outcome. One handler failing, being cancelled or failing to build
//! never hides the outcome of another.

use crate::binding::{ErasedNotificationHandler, NotificationBinding};
use crate::config::{FailurePolicy, MediatorConfig, PublishStrategy};
use crate::middleware::{build_stages, Stage};
use crate::registry::FanoutPlan;
use futures::future::{join_all, BoxFuture};
use std::any::Any;
use switchyard_core::context::DispatchContext;
use switchyard_core::error::DispatchError;
use switchyard_core::publish::{
    HandlerOutcome, HandlerStatus, NotificationMiddleware, NotificationNext, NotificationRef, PublishReport,
};

/// Drives the handlers of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutEngine {
    strategy: PublishStrategy,
    policy: FailurePolicy,
    middleware: bool,
}

impl FanoutEngine {
    /// An engine following `config`.
    #[must_use]
    pub const fn new(config: &MediatorConfig) -> Self {
        Self {
            strategy: config.publish_strategy,
            policy: config.failure_policy,
            middleware: config.notification_middleware,
        }
    }

    /// Deliver `notification` to every handler of `plan`.
    ///
    /// Never fails as a whole: each handler's result is recorded in the
    /// returned report.
    pub async fn publish(
        &self,
        notification: &(dyn Any + Send + Sync + 'static),
        plan: &FanoutPlan,
        ctx: &DispatchContext,
    ) -> PublishReport {
        tracing::debug!(
            notification = plan.notification().name(),
            handlers = plan.handlers().len(),
            strategy = ?self.strategy,
            "Publishing notification"
        );

        let outcomes = match self.strategy {
            PublishStrategy::Sequential => self.sequential(notification, plan, ctx).await,
            PublishStrategy::Concurrent => {
                join_all(
                    plan.handlers()
                        .iter()
                        .map(|binding| self.attempt(notification, plan, binding, ctx)),
                )
                .await
            }
        };
        PublishReport::new(plan.notification(), outcomes)
    }

    async fn sequential(
        &self,
        notification: &(dyn Any + Send + Sync + 'static),
        plan: &FanoutPlan,
        ctx: &DispatchContext,
    ) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::with_capacity(plan.handlers().len());
        let mut failed = false;
        for binding in plan.handlers() {
            let outcome = if failed && self.policy == FailurePolicy::StopOnFirstError {
                tracing::debug!(handler = binding.name(), "Skipping handler after earlier failure");
                HandlerOutcome {
                    handler: binding.name(),
                    registered_for: binding.registered_for(),
                    status: HandlerStatus::Skipped,
                }
            } else {
                self.attempt(notification, plan, binding, ctx).await
            };
            failed |= matches!(outcome.status, HandlerStatus::Failed(_));
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn attempt(
        &self,
        notification: &(dyn Any + Send + Sync + 'static),
        plan: &FanoutPlan,
        binding: &NotificationBinding,
        ctx: &DispatchContext,
    ) -> HandlerOutcome {
        let status = match self.invoke(notification, plan, binding, ctx).await {
            Ok(()) => HandlerStatus::Completed,
            Err(error) => {
                if error.is_cancelled() {
                    tracing::debug!(handler = binding.name(), "Notification handler cancelled");
                } else {
                    tracing::warn!(
                        handler = binding.name(),
                        notification = plan.notification().name(),
                        error = %error,
                        "Notification handler failed"
                    );
                }
                HandlerStatus::Failed(error)
            }
        };
        HandlerOutcome {
            handler: binding.name(),
            registered_for: binding.registered_for(),
            status,
        }
    }

    async fn invoke(
        &self,
        notification: &(dyn Any + Send + Sync + 'static),
        plan: &FanoutPlan,
        binding: &NotificationBinding,
        ctx: &DispatchContext,
    ) -> Result<(), DispatchError> {
        ctx.check_cancelled()?;

        let handler = binding.construct(ctx.resolver())?;
        let stages = if self.middleware {
            build_stages(plan.middleware(), ctx.resolver())?
        } else {
            Vec::new()
        };

        let notification = NotificationRef::new(notification, plan.lattice(), binding.name());
        let chain = compose(&stages, notification, &*handler, ctx);
        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(DispatchError::Cancelled),
            result = chain.run() => result,
        }
    }
}

impl Default for FanoutEngine {
    fn default() -> Self {
        Self::new(&MediatorConfig::default())
    }
}

fn compose<'a>(
    stages: &'a [Stage<dyn NotificationMiddleware>],
    notification: NotificationRef<'a>,
    handler: &'a dyn ErasedNotificationHandler,
    ctx: &'a DispatchContext,
) -> NotificationNext<'a> {
    let terminal = NotificationNext::new(move || -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            tracing::trace!(handler = notification.handler(), "Invoking notification handler");
            handler.call(notification, ctx).await
        })
    });

    stages.iter().rev().fold(terminal, |next, stage| {
        NotificationNext::new(move || -> BoxFuture<'a, Result<(), DispatchError>> {
            Box::pin(async move {
                ctx.check_cancelled()?;
                tracing::trace!(
                    middleware = stage.name(),
                    order = stage.placement.order,
                    "Entering notification middleware"
                );
                stage.instance.handle(notification, next, ctx).await
            })
        })
    })
}
