//! Operation-status management: CRUD on status records plus transactional
//! enqueue of the matching work request.
//!
//! [`StatusManager::queue_async_operation`] is atomic in effect: either an
//! operation-status record exists *and* a work request is on the queue, or
//! neither does. The record is written first; an enqueue failure triggers a
//! compensating delete. If the compensation itself fails the record is
//! orphaned, which is recoverable (retention or the next status probe
//! catches it) and surfaced as the compensation error.

mod model;
mod work;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sluice::{QueueClient, StoreClient};
use uuid::Uuid;

use crate::ctx::RequestContext;
use crate::errors::{Error, ErrorDetails, Result};
use crate::resources::{ProvisioningState, ResourceId};

pub use model::{operation_status_id, AsyncOperationStatus, GLOBAL_LOCATION};
pub use work::WorkRequest;

/// Bounded retries for ETag compare-and-swap updates.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Default advisory polling interval surfaced to clients.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Options for [`StatusManager::queue_async_operation`].
#[derive(Debug, Clone, Default)]
pub struct QueueOperationOptions {
    /// Per-operation timeout carried to the worker; the worker default
    /// applies when unset.
    pub operation_timeout: Option<Duration>,
    /// Advisory `Retry-After` for pollers; defaults to 60 seconds.
    pub retry_after: Option<Duration>,
}

/// Manages operation-status records and the queue handoff to the worker.
#[derive(Clone)]
pub struct StatusManager {
    store: Arc<dyn StoreClient>,
    queue: Arc<dyn QueueClient>,
    location: String,
}

impl StatusManager {
    pub fn new(store: Arc<dyn StoreClient>, queue: Arc<dyn QueueClient>, location: &str) -> Self {
        Self {
            store,
            queue,
            location: location.to_string(),
        }
    }

    /// The canonical status id for `(resource, operation)` under this
    /// manager's location.
    pub fn status_id(&self, resource_id: &ResourceId, operation_id: Uuid) -> String {
        operation_status_id(resource_id, &self.location, operation_id)
    }

    /// Persist an `Accepted` status record and enqueue the work request.
    #[tracing::instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    pub async fn queue_async_operation(
        &self,
        ctx: &RequestContext,
        options: QueueOperationOptions,
    ) -> Result<()> {
        let resource_id = ctx.resource_id.as_ref().ok_or_else(|| Error::BadRequest {
            message: "request does not address a valid resource id".to_string(),
        })?;

        let status_id = self.status_id(resource_id, ctx.operation_id);
        let now = Utc::now();
        let retry_after = options.retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
        let status = AsyncOperationStatus {
            id: status_id.clone(),
            name: ctx.operation_id.to_string(),
            status: ProvisioningState::Accepted,
            start_time: now,
            end_time: None,
            last_updated_time: now,
            error: None,
            linked_resource_id: resource_id.to_string(),
            location: if self.location.is_empty() {
                GLOBAL_LOCATION.to_string()
            } else {
                self.location.clone()
            },
            home_tenant_id: ctx.home_tenant_id.clone(),
            client_object_id: ctx.client_object_id.clone(),
            retry_after: retry_after.as_secs(),
        };

        let document = serde_json::to_value(&status).map_err(|e| Error::Other(e.into()))?;
        self.store.save(&status_id, &document, None).await?;

        let work = WorkRequest::from_context(ctx, options.operation_timeout)?;
        if let Err(enqueue_err) = self.queue.enqueue(work.encode()?).await {
            tracing::error!(
                operation_id = %ctx.operation_id,
                error = %enqueue_err,
                "Failed to enqueue work request, deleting status record"
            );
            // Compensate so no status record exists without a queued message.
            // A failed compensation leaves an orphan for retention to reap;
            // surface that error since the system state needs attention.
            self.store.delete(&status_id).await?;
            return Err(enqueue_err.into());
        }

        metrics::counter!(
            "rpctl_operations_enqueued_total",
            "operation_type" => work.operation_type.to_string()
        )
        .increment(1);
        Ok(())
    }

    pub async fn get(
        &self,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<AsyncOperationStatus> {
        let object = self
            .store
            .get(&self.status_id(resource_id, operation_id))
            .await?;
        Ok(object.as_type::<AsyncOperationStatus>()?)
    }

    /// Move the record to `state`, refreshing `lastUpdatedTime` and writing
    /// with ETag compare-and-swap. A lost race re-reads and retries at most
    /// [`MAX_UPDATE_ATTEMPTS`] times. Terminal records are never moved back
    /// to a non-terminal state.
    #[tracing::instrument(skip(self, resource_id, error), fields(operation_id = %operation_id, state = %state))]
    pub async fn update(
        &self,
        resource_id: &ResourceId,
        operation_id: Uuid,
        state: ProvisioningState,
        end_time: Option<DateTime<Utc>>,
        error: Option<ErrorDetails>,
    ) -> Result<()> {
        let status_id = self.status_id(resource_id, operation_id);
        let mut last_err: Option<Error> = None;
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let object = self.store.get(&status_id).await?;
            let mut status: AsyncOperationStatus = object.as_type()?;

            if status.status.is_terminal() && !state.is_terminal() {
                tracing::warn!(
                    current = %status.status,
                    requested = %state,
                    "Refusing to move a terminal operation back to a non-terminal state"
                );
                return Ok(());
            }

            status.status = state;
            status.end_time = end_time;
            status.error = error.clone();
            status.last_updated_time = Utc::now();

            let document = serde_json::to_value(&status).map_err(|e| Error::Other(e.into()))?;
            match self
                .store
                .save(&status_id, &document, Some(&object.etag))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_concurrency() => {
                    tracing::debug!(status_id = %status_id, "Lost status update race, retrying");
                    last_err = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err.unwrap_or(Error::Internal {
            operation: "update operation status".to_string(),
        }))
    }

    pub async fn delete(&self, resource_id: &ResourceId, operation_id: Uuid) -> Result<()> {
        self.store
            .delete(&self.status_id(resource_id, operation_id))
            .await?;
        Ok(())
    }
}
