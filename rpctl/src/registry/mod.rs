//! Controller registries.
//!
//! Two instances of [`ControllerRegistry`] exist at runtime: one for
//! synchronous frontend controllers consulted by the HTTP dispatch layer,
//! and one for asynchronous backend controllers consulted by the worker.
//! Both key on the canonical operation-type string.
//!
//! Keyed controllers are constructed once at registration and cached. The
//! default (fallback) controller is rebuilt on every lookup so the resolved
//! resource type can be injected into its options; full option validation
//! happens there because the type is unknown at registration time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::controllers::ControllerOptions;
use crate::errors::{Error, Result};
use crate::resources::{OperationMethod, OperationType};

type Factory<C> = Arc<dyn Fn(ControllerOptions) -> Result<Arc<C>> + Send + Sync>;

struct DefaultEntry<C: ?Sized> {
    factory: Factory<C>,
    options: ControllerOptions,
}

struct Inner<C: ?Sized> {
    controllers: HashMap<String, Arc<C>>,
    default_entry: Option<DefaultEntry<C>>,
}

/// Map from operation type to controller, with an optional fallback.
pub struct ControllerRegistry<C: ?Sized> {
    inner: RwLock<Inner<C>>,
}

impl<C: ?Sized> Default for ControllerRegistry<C> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                controllers: HashMap::new(),
                default_entry: None,
            }),
        }
    }
}

impl<C: ?Sized> ControllerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the controller via `factory` and cache it under
    /// `(resource_type, method)`. Registering the same key twice is an
    /// error.
    pub fn register(
        &self,
        resource_type: &str,
        method: OperationMethod,
        factory: impl Fn(ControllerOptions) -> Result<Arc<C>> + Send + Sync + 'static,
        options: ControllerOptions,
    ) -> Result<()> {
        let options = options
            .with_resource_type(resource_type)
            .with_method(method.clone());
        options.validate()?;
        let controller = factory(options)?;

        let key = OperationType::new(resource_type, method).to_string();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.controllers.contains_key(&key) {
            return Err(Error::Conflict {
                message: format!("operation type {key} is already registered"),
            });
        }
        inner.controllers.insert(key, controller);
        Ok(())
    }

    /// Record the fallback factory used when no keyed entry matches. The
    /// controller is built per lookup, not cached.
    pub fn register_default(
        &self,
        factory: impl Fn(ControllerOptions) -> Result<Arc<C>> + Send + Sync + 'static,
        options: ControllerOptions,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.default_entry.is_some() {
            return Err(Error::Conflict {
                message: "a default controller is already registered".to_string(),
            });
        }
        inner.default_entry = Some(DefaultEntry {
            factory: Arc::new(factory),
            options,
        });
        Ok(())
    }

    /// Resolve the controller for `operation_type`: the cached keyed entry,
    /// or a freshly built default. `Ok(None)` means nothing can serve it.
    pub fn get(&self, operation_type: &OperationType) -> Result<Option<Arc<C>>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        if let Some(controller) = inner.controllers.get(&operation_type.to_string()) {
            return Ok(Some(controller.clone()));
        }
        match &inner.default_entry {
            Some(entry) => {
                let options = entry
                    .options
                    .clone()
                    .with_resource_type(&operation_type.type_name)
                    .with_method(operation_type.method.clone());
                options.validate()?;
                Ok(Some((entry.factory)(options)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::{AsyncController, OperationResult};
    use crate::status::{StatusManager, WorkRequest};
    use async_trait::async_trait;
    use sluice::{InMemoryQueue, InMemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct TestController {
        #[allow(dead_code)]
        resource_type: String,
    }

    #[async_trait]
    impl AsyncController for TestController {
        async fn run(
            &self,
            _cancel: CancellationToken,
            _request: &WorkRequest,
        ) -> crate::errors::Result<OperationResult> {
            Ok(OperationResult::new())
        }
    }

    fn options() -> ControllerOptions {
        let store = Arc::new(InMemoryStore::new());
        let status_manager =
            StatusManager::new(store.clone(), Arc::new(InMemoryQueue::default()), "global");
        ControllerOptions::builder()
            .store(store)
            .status_manager(status_manager)
            .build()
    }

    fn factory(options: ControllerOptions) -> Result<Arc<dyn AsyncController>> {
        Ok(Arc::new(TestController {
            resource_type: options.resource_type,
        }))
    }

    #[test]
    fn registered_controller_is_cached() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        registry
            .register(
                "Applications.Test/exampleResources",
                OperationMethod::Put,
                factory,
                options(),
            )
            .unwrap();

        let op = OperationType::new("applications.test/exampleresources", OperationMethod::Put);
        let first = registry.get(&op).unwrap().unwrap();
        let second = registry.get(&op).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        registry
            .register(
                "Applications.Test/exampleResources",
                OperationMethod::Put,
                factory,
                options(),
            )
            .unwrap();
        let err = registry
            .register(
                "applications.test/EXAMPLERESOURCES",
                OperationMethod::Put,
                factory,
                options(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn miss_without_default_returns_none() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        let op = OperationType::new("Applications.Test/unknown", OperationMethod::Delete);
        assert!(registry.get(&op).unwrap().is_none());
    }

    #[test]
    fn default_controller_is_rebuilt_per_lookup_with_injected_type() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        let built = Arc::new(AtomicUsize::new(0));
        let built_in_factory = built.clone();
        registry
            .register_default(
                move |options| {
                    built_in_factory.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(options.resource_type, "APPLICATIONS.TEST/DYNAMIC");
                    factory(options)
                },
                options(),
            )
            .unwrap();

        let op = OperationType::new("Applications.Test/dynamic", OperationMethod::Put);
        let first = registry.get(&op).unwrap().unwrap();
        let second = registry.get(&op).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second), "default must not be cached");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_default_registration_is_a_conflict() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        registry.register_default(factory, options()).unwrap();
        let err = registry.register_default(factory, options()).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn keyed_entry_shadows_default() {
        let registry: ControllerRegistry<dyn AsyncController> = ControllerRegistry::new();
        registry
            .register(
                "Applications.Test/exampleResources",
                OperationMethod::Put,
                factory,
                options(),
            )
            .unwrap();
        registry.register_default(factory, options()).unwrap();

        let op = OperationType::new("Applications.Test/exampleResources", OperationMethod::Put);
        let first = registry.get(&op).unwrap().unwrap();
        let second = registry.get(&op).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second), "keyed entry should win and be cached");
    }
}
