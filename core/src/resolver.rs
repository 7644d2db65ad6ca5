//! The resolve-by-type capability handlers and middleware are built from.
//!
//! The mediator does not own a dependency-injection container. Factories
//! registered for handlers and middleware receive a [`Resolver`] and pull
//! their dependencies from it; [`ServiceMap`] is a small immutable
//! implementation for applications that do not bring their own container.

use crate::error::ConstructionError;
use crate::lattice::TypeKey;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Supplies shared service instances by type.
pub trait Resolver: Send + Sync {
    /// Look up the service registered for `key`.
    fn resolve_any(&self, key: TypeKey) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl dyn Resolver + '_ {
    /// Look up the service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::MissingDependency`] when no `T` is
    /// registered.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ConstructionError> {
        self.resolve_any(TypeKey::of::<T>())
            .and_then(|service| service.downcast::<T>().ok())
            .ok_or(ConstructionError::MissingDependency(std::any::type_name::<T>()))
    }
}

/// An immutable map from service type to a shared instance.
///
/// # Example
///
/// ```
/// use switchyard_core::resolver::{Resolver, ServiceMap};
///
/// struct Clock;
///
/// let services = ServiceMap::new().with(Clock);
/// let resolver: &dyn Resolver = &services;
/// assert!(resolver.resolve::<Clock>().is_ok());
/// assert!(resolver.resolve::<String>().is_err());
/// ```
#[derive(Default, Clone)]
pub struct ServiceMap {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service by value.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(self, service: T) -> Self {
        self.with_shared(Arc::new(service))
    }

    /// Register an already shared service.
    #[must_use]
    pub fn with_shared<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Resolver for ServiceMap {
    fn resolve_any(&self, key: TypeKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(&key.id()).cloned()
    }
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMap")
            .field("services", &self.services.len())
            .finish()
    }
}
