//! The asynchronous operation worker.
//!
//! A single dispatcher task receives leased messages from the queue and
//! fans out to per-message tasks, gated by a semaphore sized at
//! [`WorkerOptions::max_operation_concurrency`]. Each per-message task
//! decodes the work request, resolves a controller through the registry,
//! and runs it under a cancellable child token while a timer fan-in keeps
//! the message lease extended and enforces the per-operation timeout.
//!
//! Settlement rules:
//! - controller finished → completion rule, acknowledge
//! - per-operation timeout → cancel the controller, complete as `Canceled`,
//!   acknowledge
//! - worker shutdown → walk away without acknowledging so the broker
//!   redelivers (at-least-once across restarts)
//! - poison (undecodable payload, no controller, retries exhausted) →
//!   acknowledge to drop, after marking the operation failed where possible
//!
//! The completion rule writes the resource's
//! `properties.provisioningState` (ETag compare-and-swap, idempotent skip
//! when already at the target) and then the operation-status record, in
//! that order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sluice::{Message, QueueClient, StoreClient};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::controllers::{AsyncController, OperationResult};
use crate::errors::{codes, Error, ErrorDetails, Result};
use crate::registry::ControllerRegistry;
use crate::resources::{ProvisioningState, ResourceId};
use crate::status::{StatusManager, WorkRequest};

/// Bounded retries for the ETag-guarded resource-state write.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Worker tuning parameters.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Maximum concurrent controller invocations.
    pub max_operation_concurrency: usize,
    /// Deliveries after which a message is poison.
    pub max_operation_retry_count: u32,
    /// How long before lease expiry the lease is extended.
    pub message_extend_margin: Duration,
    /// Floor for the extension timer.
    pub min_message_lock_duration: Duration,
    /// Window within which duplicate deliveries would be collapsed; the
    /// completion rule's idempotence is what actually dedupes.
    pub deduplication_duration: Duration,
    /// Applied when the work request carries no timeout of its own.
    pub default_operation_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_operation_concurrency: 3,
            max_operation_retry_count: 5,
            message_extend_margin: Duration::from_secs(30),
            min_message_lock_duration: Duration::from_secs(5),
            deduplication_duration: Duration::from_secs(30),
            default_operation_timeout: Duration::from_secs(120),
        }
    }
}

/// Dequeues work requests and drives them to terminal state.
#[derive(Clone)]
pub struct AsyncWorker {
    options: WorkerOptions,
    store: Arc<dyn StoreClient>,
    status_manager: StatusManager,
    registry: Arc<ControllerRegistry<dyn AsyncController>>,
    queue: Arc<dyn QueueClient>,
    in_flight: Arc<AtomicUsize>,
}

impl AsyncWorker {
    pub fn new(
        options: WorkerOptions,
        store: Arc<dyn StoreClient>,
        status_manager: StatusManager,
        registry: Arc<ControllerRegistry<dyn AsyncController>>,
        queue: Arc<dyn QueueClient>,
    ) -> Self {
        Self {
            options,
            store,
            status_manager,
            registry,
            queue,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the dispatch loop until `cancel` fires or the dequeue stream
    /// closes.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut messages = self.queue.dequeue(cancel.clone()).await?;
        let semaphore = Arc::new(Semaphore::new(self.options.max_operation_concurrency));
        tracing::info!(
            concurrency = self.options.max_operation_concurrency,
            "Async worker starting dequeue loop"
        );

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = self.clone();
            let parent = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let in_flight = worker.in_flight.clone();
                metrics::gauge!("rpctl_operations_in_flight")
                    .set((in_flight.fetch_add(1, Ordering::Relaxed) + 1) as f64);
                let _guard = scopeguard::guard(in_flight, |in_flight| {
                    metrics::gauge!("rpctl_operations_in_flight")
                        .set((in_flight.fetch_sub(1, Ordering::Relaxed) - 1) as f64);
                });
                worker.process_message(message, parent).await;
            });
        }

        tracing::info!("Async worker dequeue loop stopped");
        Ok(())
    }

    async fn process_message(&self, message: Message, parent: CancellationToken) {
        let request = match WorkRequest::decode(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %e,
                    "Dropping undecodable work request"
                );
                finish(message).await;
                return;
            }
        };

        let span = tracing::info_span!(
            "operation",
            operation_id = %request.operation_id,
            operation_type = %request.operation_type,
            resource_id = %request.resource_id,
            correlation_id = %request.correlation_id,
            traceparent_id = %request.traceparent_id,
        );
        self.handle_request(message, request, parent)
            .instrument(span)
            .await;
    }

    async fn handle_request(
        &self,
        mut message: Message,
        request: WorkRequest,
        parent: CancellationToken,
    ) {
        let controller = match self.registry.get(&request.operation_type) {
            Ok(Some(controller)) => controller,
            Ok(None) => {
                tracing::error!("No controller registered for operation type, dropping message");
                finish(message).await;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to construct controller, dropping message");
                finish(message).await;
                return;
            }
        };

        if message.dequeue_count >= self.options.max_operation_retry_count {
            tracing::error!(
                dequeue_count = message.dequeue_count,
                max = self.options.max_operation_retry_count,
                "Message has exhausted its retries, failing the operation"
            );
            let result = OperationResult::new_failed(
                ErrorDetails::new(
                    codes::INTERNAL,
                    format!(
                        "Operation ({}) has exceeded the maximum retry count of {}",
                        request.operation_type, self.options.max_operation_retry_count
                    ),
                )
                .with_target(request.resource_id.clone()),
            );
            self.complete(message, &request, result).await;
            return;
        }

        let operation_timeout = request
            .operation_timeout
            .unwrap_or(self.options.default_operation_timeout);
        let child = parent.child_token();
        let mut handle = {
            let controller_cancel = child.clone();
            let controller_request = request.clone();
            tokio::spawn(
                async move { controller.run(controller_cancel, &controller_request).await },
            )
        };

        let timeout = tokio::time::sleep(operation_timeout);
        tokio::pin!(timeout);

        loop {
            let extend_delay = self.extend_after(message.next_visible_at);
            tokio::select! {
                _ = tokio::time::sleep(extend_delay) => {
                    match message.extend().await {
                        Ok(next_visible_at) => {
                            tracing::debug!(next_visible_at = %next_visible_at, "Extended message lease");
                        }
                        Err(e) => {
                            // Not fatal: the operation may still finish within
                            // the current lease. Repeated failures end in
                            // lease-expiry redelivery, which is safe.
                            tracing::warn!(error = %e, "Failed to extend message lease");
                        }
                    }
                }
                _ = &mut timeout => {
                    child.cancel();
                    handle.abort();
                    let mut result = OperationResult::new_canceled(format!(
                        "Operation ({}) has timed out because it was processing longer than {}",
                        request.operation_type,
                        humantime::format_duration(operation_timeout),
                    ));
                    if let Some(error) = result.error.as_mut() {
                        error.target = Some(request.resource_id.clone());
                    }
                    self.complete(message, &request, result).await;
                    return;
                }
                _ = parent.cancelled() => {
                    tracing::info!("Worker is stopping; the message will be reprocessed");
                    child.cancel();
                    handle.abort();
                    return;
                }
                joined = &mut handle => {
                    if parent.is_cancelled() {
                        // Interrupted: leave the message for redelivery even
                        // though the controller managed to return.
                        tracing::info!("Worker stopped during execution; the message will be reprocessed");
                        return;
                    }
                    let result = match joined {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "Controller returned an error");
                            OperationResult::new_failed(e.to_error_details())
                        }
                        Err(join_error) if join_error.is_panic() => {
                            let payload = join_error.into_panic();
                            let panic_message = payload
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            tracing::error!(
                                panic = %panic_message,
                                "Controller panicked; treating as an internal failure"
                            );
                            OperationResult::new_failed(ErrorDetails::new(
                                codes::INTERNAL,
                                format!("controller panicked: {panic_message}"),
                            ))
                        }
                        Err(_) => {
                            // Aborted without a panic; the aborting branches
                            // have already returned.
                            return;
                        }
                    };
                    self.complete(message, &request, result).await;
                    return;
                }
            }
        }
    }

    /// `max(min_message_lock_duration, next_visible_at - margin - now)`.
    fn extend_after(&self, next_visible_at: DateTime<Utc>) -> Duration {
        let margin = chrono::Duration::from_std(self.options.message_extend_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let until = ((next_visible_at - margin) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        until.max(self.options.min_message_lock_duration)
    }

    /// Apply a terminal result: resource state first, then the status
    /// record, then acknowledge (unless the result asks for a requeue).
    async fn complete(&self, message: Message, request: &WorkRequest, result: OperationResult) {
        let resource_id = match ResourceId::parse(&request.resource_id) {
            Ok(resource_id) => resource_id,
            Err(e) => {
                tracing::error!(error = %e, "Work request carries an unparsable resource id, dropping message");
                finish(message).await;
                return;
            }
        };

        let state = result.provisioning_state();
        if let Err(e) = self.update_resource_state(request, state).await {
            // Leave the message unacknowledged; redelivery retries completion.
            tracing::error!(error = %e, "Failed to update resource provisioning state");
            return;
        }

        if let Err(e) = self
            .status_manager
            .update(
                &resource_id,
                request.operation_id,
                state,
                state.is_terminal().then(Utc::now),
                result.error.clone(),
            )
            .await
        {
            tracing::error!(error = %e, "Failed to update operation status");
            return;
        }

        metrics::counter!(
            "rpctl_operations_completed_total",
            "state" => state.as_str()
        )
        .increment(1);

        if result.requeue {
            // The broker redelivers after the visibility timeout.
            return;
        }
        finish(message).await;
    }

    /// Write `properties.provisioningState` on the resource document with
    /// compare-and-swap. Idempotent: a document already at the target state
    /// is left untouched, which makes completion replays safe.
    async fn update_resource_state(
        &self,
        request: &WorkRequest,
        state: ProvisioningState,
    ) -> Result<()> {
        let mut last_err: Option<Error> = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let object = match self.store.get(&request.resource_id).await {
                Ok(object) => object,
                // Nothing to update: a DELETE operation removed the document.
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let mut data = object.data.clone();
            let Some(properties) = data.get_mut("properties").and_then(|p| p.as_object_mut())
            else {
                tracing::error!(
                    resource_id = %request.resource_id,
                    "Resource document has no properties map, skipping provisioning state update"
                );
                return Ok(());
            };
            let Some(current) = properties.get("provisioningState").and_then(|s| s.as_str())
            else {
                tracing::error!(
                    resource_id = %request.resource_id,
                    "Resource document has no provisioningState, skipping provisioning state update"
                );
                return Ok(());
            };

            if current.eq_ignore_ascii_case(state.as_str()) {
                return Ok(());
            }
            properties.insert(
                "provisioningState".to_string(),
                serde_json::Value::String(state.as_str().to_string()),
            );

            match self
                .store
                .save(&request.resource_id, &data, Some(&object.etag))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_concurrency() => {
                    tracing::debug!(
                        resource_id = %request.resource_id,
                        "Lost resource state write race, retrying"
                    );
                    last_err = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err.unwrap_or(Error::Internal {
            operation: "update resource provisioning state".to_string(),
        }))
    }
}

async fn finish(message: Message) {
    let id = message.id;
    if let Err(e) = message.finish(None).await {
        tracing::error!(message_id = %id, error = %e, "Failed to acknowledge message");
    }
}
