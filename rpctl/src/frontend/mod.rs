//! Synchronous frontend controllers.
//!
//! Frontend controllers serve the HTTP side of the long-running-operation
//! contract: they validate the request, persist desired state, hand the
//! operation to the status manager, and answer `202 Accepted` with the
//! `Location` / `Azure-AsyncOperation` polling URLs. Reads (GET, LIST,
//! operation status/result) are served straight from the store.

pub mod operation_status;
pub mod resource;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use url::Url;
use uuid::Uuid;

use crate::ctx::RequestContext;
use crate::errors::Result;

pub use operation_status::{
    GetOperationResultController, GetOperationStatusController, ListOperationStatusesController,
};
pub use resource::{
    AsyncDeleteController, AsyncPutController, GetResourceController, ListResourcesController,
};

/// One synchronous request execution.
#[async_trait]
pub trait FrontendController: Send + Sync {
    async fn run(&self, ctx: &RequestContext, body: Option<serde_json::Value>) -> Result<Response>;
}

/// Scheme-and-authority prefix for absolute polling URLs, derived from the
/// referer when it parses and the `Host` header otherwise.
fn url_base(ctx: &RequestContext) -> String {
    if let Ok(url) = ctx.referer.parse::<Url>() {
        if let Some(host) = url.host_str() {
            let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
            return format!("{}://{host}{port}", url.scheme());
        }
    }
    if ctx.host.is_empty() {
        String::new()
    } else {
        format!("http://{}", ctx.host)
    }
}

/// The `Location` and `Azure-AsyncOperation` URLs for an accepted
/// operation.
pub fn async_operation_urls(ctx: &RequestContext, operation_id: Uuid) -> Option<(String, String)> {
    let resource_id = ctx.resource_id.as_ref()?;
    let base = url_base(ctx);
    let api_version = if ctx.api_version.is_empty() {
        String::new()
    } else {
        format!("?api-version={}", ctx.api_version)
    };
    // The prefix mirrors the operation-status id composition so the URLs
    // resolve to the records the status manager writes.
    let prefix = format!(
        "{base}{}/providers/{}/locations/{}",
        resource_id.plane_scope(),
        resource_id.provider_namespace(),
        ctx.location,
    );
    Some((
        format!("{prefix}/operationResults/{operation_id}{api_version}"),
        format!("{prefix}/operationStatuses/{operation_id}{api_version}"),
    ))
}

/// `202 Accepted` with the polling headers of the long-running-operation
/// contract.
pub fn accepted_response(
    ctx: &RequestContext,
    operation_id: Uuid,
    retry_after_secs: u64,
    body: serde_json::Value,
) -> Result<Response> {
    let (location, async_operation) =
        async_operation_urls(ctx, operation_id).ok_or_else(|| crate::errors::Error::Internal {
            operation: "build polling URLs without a resource id".to_string(),
        })?;
    let response = Response::builder()
        .status(StatusCode::ACCEPTED)
        .header("Location", location)
        .header("Azure-AsyncOperation", async_operation)
        .header("Retry-After", retry_after_secs.to_string())
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).map_err(
            |e| crate::errors::Error::Other(e.into()),
        )?))
        .map_err(|e| crate::errors::Error::Other(e.into()))?;
    Ok(response)
}
