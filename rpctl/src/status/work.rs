//! The queued work-request payload.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ctx::RequestContext;
use crate::errors::{Error, Result};
use crate::resources::OperationType;

/// Payload handed from the frontend to the async worker through the queue.
///
/// This is the authoritative handoff: nothing beyond a decoded `WorkRequest`
/// is required to resume an operation after a crash or redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub api_version: String,
    pub operation_id: Uuid,
    pub operation_type: OperationType,
    pub resource_id: String,
    pub correlation_id: String,
    pub traceparent_id: String,
    pub accept_language: String,
    pub home_tenant_id: String,
    pub client_object_id: String,
    /// Per-operation timeout override; the worker default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub operation_timeout: Option<Duration>,
}

impl WorkRequest {
    /// Build the payload from a request context whose operation type has
    /// been resolved by the routing layer.
    pub fn from_context(ctx: &RequestContext, operation_timeout: Option<Duration>) -> Result<Self> {
        let operation_type = ctx.operation_type.clone().ok_or_else(|| Error::Internal {
            operation: "build work request without a routed operation type".to_string(),
        })?;
        let resource_id = ctx
            .resource_id
            .as_ref()
            .ok_or_else(|| Error::BadRequest {
                message: "request does not address a valid resource id".to_string(),
            })?
            .to_string();

        Ok(Self {
            api_version: ctx.api_version.clone(),
            operation_id: ctx.operation_id,
            operation_type,
            resource_id,
            correlation_id: ctx.correlation_id.clone(),
            traceparent_id: ctx.traceparent.clone(),
            accept_language: ctx.accept_language.clone(),
            home_tenant_id: ctx.home_tenant_id.clone(),
            client_object_id: ctx.client_object_id.clone(),
            operation_timeout,
        })
    }

    /// Serialize for the queue.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Other(e.into()))
    }

    /// Deserialize a queued payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Other(e.into()))
    }
}
