//! Error taxonomy for dispatch.
//!
//! Configuration problems (missing or ambiguous handlers, components the
//! resolver cannot build) are distinguished from failures raised by user
//! code, which travel through the pipeline unchanged inside
//! [`DispatchError::Handler`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can end a dispatch.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No handler is registered for the request type
    #[error("No handler registered for request {request}")]
    HandlerNotFound {
        /// The request type name
        request: &'static str,
    },

    /// More than one handler is registered for the request type
    #[error("Request {request} has {} handlers registered, exactly one is required: {handlers:?}", .handlers.len())]
    AmbiguousHandler {
        /// The request type name
        request: &'static str,
        /// Names of every registered handler
        handlers: Vec<&'static str>,
    },

    /// The resolver could not produce a middleware instance
    ///
    /// This is a wiring defect: it is never retried and must be fixed at
    /// startup.
    #[error("Failed to construct middleware {middleware}: {source}")]
    MiddlewareConstruction {
        /// The middleware type name
        middleware: &'static str,
        /// Why construction failed
        source: ConstructionError,
    },

    /// The resolver could not produce a handler instance
    #[error("Failed to construct handler {handler}: {source}")]
    HandlerConstruction {
        /// The handler type name
        handler: &'static str,
        /// Why construction failed
        source: ConstructionError,
    },

    /// A query completed without producing a result
    #[error("Query {request} completed without a result")]
    ResultRequired {
        /// The query type name
        request: &'static str,
    },

    /// The dispatch observed its cancellation token
    #[error("Dispatch cancelled")]
    Cancelled,

    /// A pipeline stage passed on a value of the wrong type
    #[error("Pipeline stage {stage} produced a value that is not a {expected}")]
    TypeMismatch {
        /// The type the next stage expected
        expected: &'static str,
        /// Where the mismatch was detected
        stage: &'static str,
    },

    /// A handler or middleware failed
    #[error(transparent)]
    Handler(HandlerError),
}

impl DispatchError {
    /// Wrap a failure raised by a handler or middleware.
    pub fn handler(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Handler(HandlerError::new(error))
    }

    /// Whether this error is the cancellation signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error points at a wiring problem rather than a
    /// runtime failure.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::HandlerNotFound { .. }
                | Self::AmbiguousHandler { .. }
                | Self::MiddlewareConstruction { .. }
                | Self::HandlerConstruction { .. }
        )
    }

    /// The original user error, if this is a handler failure of type `E`.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Handler(error) => error.downcast_ref(),
            _ => None,
        }
    }
}

/// A failure raised by user code inside the pipeline.
///
/// The original error is kept behind an [`Arc`] so the error stays
/// cloneable (publish reports hand out copies) and can be downcast back to
/// its concrete type.
#[derive(Clone)]
pub struct HandlerError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl HandlerError {
    /// Wrap any error or message.
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            inner: Arc::from(error.into()),
        }
    }

    /// Borrow the original error as `E`.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Borrow the original error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Why a handler or middleware instance could not be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// A required dependency is not available from the resolver
    #[error("Dependency {0} is not registered with the resolver")]
    MissingDependency(&'static str),

    /// The factory failed for another reason
    #[error("{0}")]
    Failed(String),
}
