//! HTTP middleware: request-context injection and error responses.
//!
//! Every ARM-facing route runs behind [`request_context_middleware`], which
//! parses the inbound request into a [`RequestContext`] and injects it into
//! the request extensions under its type key. Extraction failures (a bad
//! `top` value, for instance) short-circuit into the canonical error body
//! before any handler runs.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::ctx::RequestContext;
use crate::errors::Error;
use crate::AppState;

/// Options for the context middleware, validated at construction time.
#[derive(Debug, Clone)]
pub struct RequestCtxOptions {
    /// Fixed prefix stripped before resource-id parsing; when empty the
    /// base is derived from the path per request.
    pub path_base: String,
    /// The provider location stamped on every context.
    pub location: String,
}

impl RequestCtxOptions {
    /// # Panics
    /// Panics when `location` is empty. A missing location is a deployment
    /// programming error and must fail loudly at startup, not per request.
    pub fn new(path_base: &str, location: &str) -> Self {
        assert!(
            !location.is_empty(),
            "the request context middleware requires a non-empty location"
        );
        Self {
            path_base: path_base.to_string(),
            location: location.to_string(),
        }
    }
}

/// Implementation for [`request_context_middleware`]. Split out so it can
/// be exercised without running the full middleware stack.
pub(crate) fn inject_context(
    options: &RequestCtxOptions,
    request: Request,
) -> Result<Request, Error> {
    let (mut parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts, &options.path_base, &options.location)?;
    parts.extensions.insert(Arc::new(ctx));
    Ok(Request::from_parts(parts, body))
}

pub async fn request_context_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let request = inject_context(&state.ctx_options, request)?;
    Ok(next.run(request).await)
}
