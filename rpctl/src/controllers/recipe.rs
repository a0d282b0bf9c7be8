//! Recipe controllers: delegate the mutation path to the external recipe
//! engine. PUT renders and applies the recipe, then records the output
//! resources on the stored document; DELETE tears the recipe down before
//! removing the document. Engine failures propagate and surface as
//! `Internal` on the operation status.

use async_trait::async_trait;
use sluice::StoreClient;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::recipes::{RecipeEngine, RecipeOutput, RecipeSpec};
use crate::resources::ResourceId;
use crate::status::WorkRequest;

use super::{AsyncController, ControllerOptions, OperationResult};

/// Bounded retries for the ETag-guarded output-resource write.
const MAX_WRITE_ATTEMPTS: usize = 3;

fn engine(options: &ControllerOptions) -> Result<&dyn RecipeEngine> {
    options
        .recipes
        .as_deref()
        .ok_or_else(|| Error::Internal {
            operation: "execute a recipe without a configured engine".to_string(),
        })
}

fn spec_for(resource_id: &ResourceId, properties: serde_json::Value) -> RecipeSpec {
    RecipeSpec {
        resource_id: resource_id.to_string(),
        resource_type: resource_id.type_name(),
        resource_group: resource_id.resource_group().map(str::to_string),
        properties,
    }
}

pub struct RecipePutController {
    options: ControllerOptions,
}

impl RecipePutController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }

    /// Write the recipe outputs under `properties.status` with ETag
    /// compare-and-swap, re-reading on a lost race.
    async fn record_outputs(&self, resource_id: &ResourceId, output: &RecipeOutput) -> Result<()> {
        let id = resource_id.to_string();
        let mut last_err: Option<Error> = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let object = self.options.store.get(&id).await?;
            let mut data = object.data.clone();
            let properties = data
                .as_object_mut()
                .and_then(|root| {
                    root.entry("properties")
                        .or_insert_with(|| serde_json::json!({}))
                        .as_object_mut()
                })
                .ok_or_else(|| Error::Internal {
                    operation: format!("record recipe outputs on malformed resource {id}"),
                })?;
            properties.insert(
                "status".to_string(),
                serde_json::json!({
                    "outputResources": output.output_resources,
                    "values": output.values,
                }),
            );

            match self.options.store.save(&id, &data, Some(&object.etag)).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_concurrency() => {
                    tracing::debug!(resource_id = %id, "Lost output-resource write race, retrying");
                    last_err = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err.unwrap_or(Error::Internal {
            operation: "record recipe outputs".to_string(),
        }))
    }
}

#[async_trait]
impl AsyncController for RecipePutController {
    async fn run(
        &self,
        cancel: CancellationToken,
        request: &WorkRequest,
    ) -> Result<OperationResult> {
        let resource_id = ResourceId::parse(&request.resource_id)?;
        let object = self.options.store.get(&resource_id.to_string()).await?;
        let properties = object
            .data
            .get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let spec = spec_for(&resource_id, properties);
        let engine = engine(&self.options)?;
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(OperationResult::new_canceled(format!(
                    "Recipe execution for {resource_id} was cancelled"
                )));
            }
            output = engine.execute(&spec) => output?,
        };

        self.record_outputs(&resource_id, &output).await?;
        Ok(OperationResult::new())
    }
}

pub struct RecipeDeleteController {
    options: ControllerOptions,
}

impl RecipeDeleteController {
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl AsyncController for RecipeDeleteController {
    async fn run(
        &self,
        cancel: CancellationToken,
        request: &WorkRequest,
    ) -> Result<OperationResult> {
        let resource_id = ResourceId::parse(&request.resource_id)?;
        let id = resource_id.to_string();

        // Already gone: nothing to tear down, deletes are idempotent.
        let object = match self.options.store.get(&id).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(OperationResult::new()),
            Err(e) => return Err(e.into()),
        };
        let properties = object
            .data
            .get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let spec = spec_for(&resource_id, properties);
        let engine = engine(&self.options)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(OperationResult::new_canceled(format!(
                    "Recipe teardown for {resource_id} was cancelled"
                )));
            }
            result = engine.delete(&spec) => result?,
        }

        match self.options.store.delete(&id).await {
            Ok(()) => Ok(OperationResult::new()),
            Err(e) if e.is_not_found() => Ok(OperationResult::new()),
            Err(e) => Err(e.into()),
        }
    }
}
