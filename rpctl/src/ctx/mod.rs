//! Per-request context extracted from inbound ARM-style requests.
//!
//! The context carries correlation, identity, and operation identity from
//! the HTTP edge down into queued work. It is built once per request by the
//! middleware in [`crate::middleware`] and injected into the request
//! extensions; downstream code reads it through [`RequestContext::require`],
//! which panics when the context is missing because that is a routing bug,
//! not a runtime condition.

use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use url::Url;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::resources::{OperationType, ResourceId};

pub const DEFAULT_QUERY_ITEM_COUNT: usize = 10;
pub const MIN_QUERY_ITEM_COUNT: usize = 5;
pub const MAX_QUERY_ITEM_COUNT: usize = 20;

// Recognized request headers.
pub const HEADER_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
pub const HEADER_CORRELATION_REQUEST_ID: &str = "x-ms-correlation-request-id";
pub const HEADER_CLIENT_APP_ID: &str = "x-ms-client-app-id";
pub const HEADER_CLIENT_OBJECT_ID: &str = "x-ms-client-object-id";
pub const HEADER_CLIENT_PRINCIPAL_NAME: &str = "x-ms-client-principal-name";
pub const HEADER_CLIENT_PRINCIPAL_ID: &str = "x-ms-client-principal-id";
pub const HEADER_HOME_TENANT_ID: &str = "x-ms-home-tenant-id";
pub const HEADER_CLIENT_TENANT_ID: &str = "x-ms-client-tenant-id";
pub const HEADER_SYSTEM_DATA: &str = "x-ms-arm-resource-system-data";
pub const HEADER_TRACEPARENT: &str = "traceparent";

// Recognized query parameters.
pub const QUERY_API_VERSION: &str = "api-version";
pub const QUERY_SKIP_TOKEN: &str = "skipToken";
pub const QUERY_TOP: &str = "top";

/// Request-scoped metadata for one inbound ARM request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Parsed resource id; `None` when the routed path is not a valid id.
    /// Handlers that need an id must reject the request themselves.
    pub resource_id: Option<ResourceId>,
    /// Fresh UUIDv4 assigned to this request's operation lifecycle.
    pub operation_id: Uuid,
    /// Filled in by the routing layer once the operation is resolved.
    pub operation_type: Option<OperationType>,
    pub client_request_id: String,
    pub correlation_id: String,
    pub traceparent: String,
    pub home_tenant_id: String,
    pub client_tenant_id: String,
    pub client_object_id: String,
    pub client_app_id: String,
    pub client_principal_name: String,
    pub client_principal_id: String,
    pub api_version: String,
    pub accept_language: String,
    pub referer: String,
    pub user_agent: String,
    pub host: String,
    /// Raw system-metadata blob, passed through untouched.
    pub system_data: String,
    /// The provider's configured location, e.g. `global`.
    pub location: String,
    pub if_match: String,
    pub if_none_match: String,
    pub skip_token: Option<String>,
    /// Paging count, clamped to `[MIN_QUERY_ITEM_COUNT, MAX_QUERY_ITEM_COUNT]`.
    pub top: usize,
    pub http_method: Method,
    pub original_url: String,
}

impl RequestContext {
    /// Build a context from request parts.
    ///
    /// `path_base` may be empty, in which case the base is derived from the
    /// first case-insensitive occurrence of `/planes/` or `/subscriptions/`
    /// in the routed path. `location` must be validated non-empty by the
    /// caller (see [`crate::middleware::RequestCtxOptions`]).
    pub fn from_parts(parts: &Parts, path_base: &str, location: &str) -> Result<Self> {
        let original_url = parts.uri.to_string();

        // ARM proxies carry the original client URL in Referer; fall back to
        // the request URL when it is absent or malformed.
        let referer = header(&parts.headers, "referer");
        let routed_path = referer
            .parse::<Url>()
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| parts.uri.path().to_string());

        let base = if path_base.is_empty() {
            derive_path_base(&routed_path)
        } else {
            path_base.to_string()
        };
        let resource_path = routed_path
            .strip_prefix(&base)
            .unwrap_or(routed_path.as_str());

        // Parse failures do not abort extraction; downstream handlers reject
        // invalid ids with a proper error response.
        let resource_id = ResourceId::parse(resource_path).ok();

        let query: Vec<(String, String)> = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        let query_param =
            |name: &str| query.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        let top = parse_top(query_param(QUERY_TOP).as_deref())?;

        Ok(Self {
            resource_id,
            operation_id: Uuid::new_v4(),
            operation_type: None,
            client_request_id: header(&parts.headers, HEADER_CLIENT_REQUEST_ID),
            correlation_id: header(&parts.headers, HEADER_CORRELATION_REQUEST_ID),
            traceparent: header(&parts.headers, HEADER_TRACEPARENT),
            home_tenant_id: header(&parts.headers, HEADER_HOME_TENANT_ID),
            client_tenant_id: header(&parts.headers, HEADER_CLIENT_TENANT_ID),
            client_object_id: header(&parts.headers, HEADER_CLIENT_OBJECT_ID),
            client_app_id: header(&parts.headers, HEADER_CLIENT_APP_ID),
            client_principal_name: header(&parts.headers, HEADER_CLIENT_PRINCIPAL_NAME),
            client_principal_id: header(&parts.headers, HEADER_CLIENT_PRINCIPAL_ID),
            api_version: query_param(QUERY_API_VERSION).unwrap_or_default(),
            accept_language: header(&parts.headers, "accept-language"),
            referer,
            user_agent: header(&parts.headers, "user-agent"),
            host: header(&parts.headers, "host"),
            system_data: header(&parts.headers, HEADER_SYSTEM_DATA),
            location: location.to_string(),
            if_match: header(&parts.headers, "if-match"),
            if_none_match: header(&parts.headers, "if-none-match"),
            skip_token: query_param(QUERY_SKIP_TOKEN),
            top,
            http_method: parts.method.clone(),
            original_url,
        })
    }

    /// Copy of the context with the routed operation type filled in.
    pub fn with_operation_type(&self, operation_type: OperationType) -> Self {
        let mut ctx = self.clone();
        ctx.operation_type = Some(operation_type);
        ctx
    }

    /// Read the context out of request extensions.
    ///
    /// # Panics
    /// Panics when no context was injected: the route is not behind the
    /// context middleware, which is a wiring bug.
    pub fn require(extensions: &axum::http::Extensions) -> std::sync::Arc<RequestContext> {
        extensions
            .get::<std::sync::Arc<RequestContext>>()
            .cloned()
            .expect("RequestContext missing from request extensions: route is not behind the context middleware")
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Everything before the first case-insensitive `/planes/` or
/// `/subscriptions/` segment.
fn derive_path_base(path: &str) -> String {
    let lowered = path.to_lowercase();
    let planes = lowered.find("/planes/");
    let subscriptions = lowered.find("/subscriptions/");
    let cut = match (planes, subscriptions) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return String::new(),
    };
    path[..cut].to_string()
}

fn parse_top(raw: Option<&str>) -> Result<usize> {
    match raw {
        None | Some("") => Ok(DEFAULT_QUERY_ITEM_COUNT),
        Some(raw) => {
            let value: usize = raw.parse().map_err(|_| Error::InvalidTopQueryParam {
                raw: raw.to_string(),
            })?;
            if !(MIN_QUERY_ITEM_COUNT..=MAX_QUERY_ITEM_COUNT).contains(&value) {
                return Err(Error::TopQueryParamOutOfBounds {
                    min: MIN_QUERY_ITEM_COUNT,
                    max: MAX_QUERY_ITEM_COUNT,
                });
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use rstest::rstest;

    const RESOURCE_URL: &str = "/planes/radius/local/resourceGroups/g/providers/Applications.Test/exampleResources/my-example";

    fn parts_for(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method(Method::PUT).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn extracts_resource_id_and_headers() {
        let parts = parts_for(
            &format!("{RESOURCE_URL}?api-version=2024-01-01"),
            &[
                (HEADER_CORRELATION_REQUEST_ID, "corr-1"),
                (HEADER_CLIENT_REQUEST_ID, "client-1"),
                (HEADER_HOME_TENANT_ID, "tenant-1"),
                (HEADER_CLIENT_OBJECT_ID, "object-1"),
                (HEADER_TRACEPARENT, "00-abc-def-01"),
                ("accept-language", "en-GB"),
            ],
        );
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();

        assert_eq!(ctx.resource_id.as_ref().unwrap().to_string(), RESOURCE_URL);
        assert_eq!(ctx.correlation_id, "corr-1");
        assert_eq!(ctx.client_request_id, "client-1");
        assert_eq!(ctx.home_tenant_id, "tenant-1");
        assert_eq!(ctx.client_object_id, "object-1");
        assert_eq!(ctx.traceparent, "00-abc-def-01");
        assert_eq!(ctx.accept_language, "en-GB");
        assert_eq!(ctx.api_version, "2024-01-01");
        assert_eq!(ctx.location, "global");
        assert_eq!(ctx.top, DEFAULT_QUERY_ITEM_COUNT);
        assert_eq!(ctx.http_method, Method::PUT);
        assert!(ctx.operation_type.is_none());
    }

    #[test]
    fn each_request_gets_a_fresh_operation_id() {
        let parts = parts_for(RESOURCE_URL, &[]);
        let a = RequestContext::from_parts(&parts, "", "global").unwrap();
        let b = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert_ne!(a.operation_id, b.operation_id);
    }

    #[test]
    fn referer_path_wins_over_request_path() {
        let parts = parts_for(
            "/proxied",
            &[("referer", &format!("https://arm.example.com{RESOURCE_URL}"))],
        );
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert_eq!(ctx.resource_id.as_ref().unwrap().to_string(), RESOURCE_URL);
    }

    #[test]
    fn malformed_referer_falls_back_to_request_url() {
        let parts = parts_for(RESOURCE_URL, &[("referer", "::not a url::")]);
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert_eq!(ctx.resource_id.as_ref().unwrap().to_string(), RESOURCE_URL);
    }

    #[rstest]
    #[case(&format!("/apis/v3{RESOURCE_URL}"))]
    #[case(&format!("/apis/v3{}", RESOURCE_URL.to_uppercase()))]
    fn path_base_is_derived_case_insensitively(#[case] uri: &str) {
        let parts = parts_for(uri, &[]);
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        let id = ctx.resource_id.as_ref().expect("id should parse");
        assert_eq!(id.plane_scope().to_lowercase(), "/planes/radius/local");
    }

    #[test]
    fn configured_path_base_is_stripped() {
        let parts = parts_for(&format!("/base{RESOURCE_URL}"), &[]);
        let ctx = RequestContext::from_parts(&parts, "/base", "global").unwrap();
        assert_eq!(ctx.resource_id.as_ref().unwrap().to_string(), RESOURCE_URL);
    }

    #[test]
    fn unparsable_path_leaves_resource_id_empty() {
        let parts = parts_for("/not-an-arm-path", &[]);
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert!(ctx.resource_id.is_none());
    }

    #[rstest]
    #[case("", DEFAULT_QUERY_ITEM_COUNT)]
    #[case("top=5", 5)]
    #[case("top=20", 20)]
    #[case("top=10", 10)]
    fn top_accepts_values_in_window(#[case] query: &str, #[case] expected: usize) {
        let uri = if query.is_empty() {
            RESOURCE_URL.to_string()
        } else {
            format!("{RESOURCE_URL}?{query}")
        };
        let parts = parts_for(&uri, &[]);
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert_eq!(ctx.top, expected);
    }

    #[rstest]
    #[case("top=4")]
    #[case("top=21")]
    fn top_out_of_bounds_is_rejected(#[case] query: &str) {
        let parts = parts_for(&format!("{RESOURCE_URL}?{query}"), &[]);
        let err = RequestContext::from_parts(&parts, "", "global").unwrap_err();
        assert!(matches!(err, Error::TopQueryParamOutOfBounds { min: 5, max: 20 }));
    }

    #[test]
    fn top_non_numeric_is_rejected() {
        let parts = parts_for(&format!("{RESOURCE_URL}?top=xyz"), &[]);
        let err = RequestContext::from_parts(&parts, "", "global").unwrap_err();
        assert!(matches!(err, Error::InvalidTopQueryParam { .. }));
    }

    #[test]
    fn skip_token_is_captured() {
        let parts = parts_for(&format!("{RESOURCE_URL}?skipToken=abc"), &[]);
        let ctx = RequestContext::from_parts(&parts, "", "global").unwrap();
        assert_eq!(ctx.skip_token.as_deref(), Some("abc"));
    }

    #[test]
    #[should_panic(expected = "RequestContext missing")]
    fn require_panics_without_injection() {
        let extensions = axum::http::Extensions::new();
        let _ = RequestContext::require(&extensions);
    }
}
