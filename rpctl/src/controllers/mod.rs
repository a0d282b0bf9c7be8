//! Asynchronous backend controllers.
//!
//! A controller executes one dequeued operation against one resource. The
//! worker resolves controllers through the registry by operation type,
//! invokes them with a cancellation token, and turns their
//! [`OperationResult`] (or error, or panic) into terminal resource and
//! operation-status state.

pub mod dynamic;
pub mod inert;
pub mod recipe;
mod result;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use sluice::StoreClient;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogClient;
use crate::errors::{Error, Result};
use crate::recipes::RecipeEngine;
use crate::resources::OperationMethod;
use crate::status::{StatusManager, WorkRequest};

pub use result::OperationResult;

/// Fully populated dependencies handed to controller factories.
///
/// The store and status manager are required at construction. The resource
/// type and method are injected by the registry; default controllers only
/// learn theirs at dispatch time, so [`ControllerOptions::validate`] runs
/// per lookup rather than at registration.
#[derive(Clone, Builder)]
pub struct ControllerOptions {
    pub store: Arc<dyn StoreClient>,
    pub status_manager: StatusManager,
    /// Fully qualified resource type this controller instance serves.
    /// Empty until the registry injects it for default controllers.
    #[builder(default)]
    pub resource_type: String,
    /// Routed operation method, injected by the registry alongside the
    /// resource type.
    pub method: Option<OperationMethod>,
    pub catalog: Option<Arc<dyn CatalogClient>>,
    pub recipes: Option<Arc<dyn RecipeEngine>>,
    /// Advisory polling interval surfaced on 202 responses.
    #[builder(default = Duration::from_secs(60))]
    pub retry_after: Duration,
    /// Per-operation timeout stamped onto queued work requests; the worker
    /// default applies when unset.
    pub operation_timeout: Option<Duration>,
}

impl ControllerOptions {
    pub fn with_resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = resource_type.to_string();
        self
    }

    pub fn with_method(mut self, method: OperationMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource_type.is_empty() {
            return Err(Error::Internal {
                operation: "construct a controller without a resource type".to_string(),
            });
        }
        Ok(())
    }
}

/// One asynchronous operation execution.
///
/// Implementations must observe `cancel` on every blocking call: a
/// cancelled token means the worker is abandoning the run (timeout or
/// shutdown) and the invocation's effects must stop. Invocations start
/// fresh from the store; controllers hold no mutable per-operation state.
#[async_trait]
pub trait AsyncController: Send + Sync {
    async fn run(&self, cancel: CancellationToken, request: &WorkRequest)
        -> Result<OperationResult>;
}
