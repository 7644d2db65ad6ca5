//! Per-dispatch context threaded through every pipeline stage.

use crate::error::{ConstructionError, DispatchError};
use crate::resolver::{Resolver, ServiceMap};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a stage may need besides the message itself.
///
/// One context is created per `send`/`query`/`publish` call and shared by
/// every middleware and handler of that call. Cloning is cheap.
#[derive(Clone)]
pub struct DispatchContext {
    cancellation: CancellationToken,
    resolver: Arc<dyn Resolver>,
}

impl DispatchContext {
    /// Create a context for one dispatch.
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            resolver,
        }
    }

    /// A context with no services and a fresh token, for tests and
    /// handlers that need no dependencies.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Arc::new(ServiceMap::new()), CancellationToken::new())
    }

    /// The cancellation token of this dispatch.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the dispatch has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with [`DispatchError::Cancelled`] if the dispatch was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Cancelled`] once the token is cancelled.
    pub fn check_cancelled(&self) -> Result<(), DispatchError> {
        if self.is_cancelled() {
            Err(DispatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The resolver services are looked up from.
    #[must_use]
    pub fn resolver(&self) -> &dyn Resolver {
        &*self.resolver
    }

    /// Shared handle to the resolver.
    #[must_use]
    pub fn shared_resolver(&self) -> Arc<dyn Resolver> {
        Arc::clone(&self.resolver)
    }

    /// Look up a service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::MissingDependency`] when no `T` is
    /// registered.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ConstructionError> {
        self.resolver().resolve::<T>()
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
