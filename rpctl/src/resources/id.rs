//! ARM-style resource id parsing and formatting.
//!
//! Two root forms are recognized:
//!
//! ```text
//! /planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/{Namespace}/{type}/{name}
//! /subscriptions/{subscriptionId}/resourceGroups/{rg}/providers/{Namespace}/{type}/{name}
//! ```
//!
//! Scope pairs and typed segments may nest arbitrarily deep; the trailing
//! name may be absent, which makes the id address a collection rather than
//! an instance (a LIST URL and a GET URL therefore parse into equivalent
//! ids). Parsing preserves the input's casing; comparisons against the
//! store happen on lowercased keys.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid resource id {id:?}: {reason}")]
pub struct InvalidResourceId {
    pub id: String,
    pub reason: &'static str,
}

impl InvalidResourceId {
    fn new(id: &str, reason: &'static str) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }
}

/// The root scope of a resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaneScope {
    Planes {
        plane_type: String,
        plane_name: String,
    },
    Subscription {
        subscription_id: String,
    },
}

impl std::fmt::Display for PlaneScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaneScope::Planes {
                plane_type,
                plane_name,
            } => write!(f, "/planes/{plane_type}/{plane_name}"),
            PlaneScope::Subscription { subscription_id } => {
                write!(f, "/subscriptions/{subscription_id}")
            }
        }
    }
}

/// A parsed resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    plane: PlaneScope,
    /// Scope pairs between the plane scope and `/providers/`, e.g.
    /// `[("resourceGroups", Some("g"))]`. Only the last pair may lack a value.
    scope: Vec<(String, Option<String>)>,
    /// Provider namespace, e.g. `Applications.Test`; empty for scope-only ids.
    namespace: String,
    /// Typed segments after the namespace; only the last pair may lack a name.
    types: Vec<(String, Option<String>)>,
}

impl ResourceId {
    pub fn parse(raw: &str) -> Result<Self, InvalidResourceId> {
        let trimmed = raw.trim_end_matches('/');
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Err(InvalidResourceId::new(raw, "must start with '/'"));
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(InvalidResourceId::new(raw, "empty path segment"));
        }

        let mut idx = 0;
        let plane = match segments.first() {
            Some(s) if s.eq_ignore_ascii_case("planes") => {
                let (Some(plane_type), Some(plane_name)) = (segments.get(1), segments.get(2))
                else {
                    return Err(InvalidResourceId::new(raw, "incomplete plane scope"));
                };
                idx = 3;
                PlaneScope::Planes {
                    plane_type: plane_type.to_string(),
                    plane_name: plane_name.to_string(),
                }
            }
            Some(s) if s.eq_ignore_ascii_case("subscriptions") => {
                let Some(subscription_id) = segments.get(1) else {
                    return Err(InvalidResourceId::new(raw, "missing subscription id"));
                };
                idx = 2;
                PlaneScope::Subscription {
                    subscription_id: subscription_id.to_string(),
                }
            }
            _ => {
                return Err(InvalidResourceId::new(
                    raw,
                    "must start with /planes or /subscriptions",
                ));
            }
        };

        let mut scope = Vec::new();
        let mut namespace = String::new();
        let mut types = Vec::new();

        while idx < segments.len() {
            if segments[idx].eq_ignore_ascii_case("providers") {
                let Some(ns) = segments.get(idx + 1) else {
                    return Err(InvalidResourceId::new(raw, "missing provider namespace"));
                };
                namespace = ns.to_string();
                idx += 2;
                while idx < segments.len() {
                    types.push((
                        segments[idx].to_string(),
                        segments.get(idx + 1).map(|s| s.to_string()),
                    ));
                    idx += 2;
                }
                break;
            }
            scope.push((
                segments[idx].to_string(),
                segments.get(idx + 1).map(|s| s.to_string()),
            ));
            idx += 2;
        }

        if !namespace.is_empty() && types.is_empty() {
            return Err(InvalidResourceId::new(raw, "provider without resource type"));
        }

        Ok(Self {
            plane,
            scope,
            namespace,
            types,
        })
    }

    /// The root scope truncated after the plane/subscription segment, e.g.
    /// `/planes/radius/local`.
    pub fn plane_scope(&self) -> String {
        self.plane.to_string()
    }

    /// The full scope portion (plane scope plus scope pairs, no provider).
    pub fn root_scope(&self) -> String {
        let mut out = self.plane.to_string();
        for (key, value) in &self.scope {
            out.push('/');
            out.push_str(key);
            if let Some(value) = value {
                out.push('/');
                out.push_str(value);
            }
        }
        out
    }

    /// Provider namespace as written, e.g. `Applications.Test`. Empty for
    /// scope-only ids.
    pub fn provider_namespace(&self) -> &str {
        &self.namespace
    }

    /// Provider-qualified type, e.g. `Applications.Test/exampleResources`.
    pub fn type_name(&self) -> String {
        let mut out = self.namespace.clone();
        for (type_segment, _) in &self.types {
            out.push('/');
            out.push_str(type_segment);
        }
        out
    }

    /// The trailing resource name; empty for collections and scope-only ids.
    pub fn name(&self) -> &str {
        self.types
            .last()
            .and_then(|(_, name)| name.as_deref())
            .or_else(|| self.scope.last().and_then(|(_, value)| value.as_deref()))
            .unwrap_or("")
    }

    /// Whether the id addresses a collection (no trailing name).
    pub fn is_collection(&self) -> bool {
        match self.types.last() {
            Some((_, name)) => name.is_none(),
            None => self.scope.last().is_none_or(|(_, value)| value.is_none()),
        }
    }

    /// Whether the id addresses a provider-typed resource or collection.
    pub fn is_provider_resource(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// The `resourceGroups` scope value, when present.
    pub fn resource_group(&self) -> Option<&str> {
        self.scope
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("resourcegroups"))
            .and_then(|(_, value)| value.as_deref())
    }

    /// Drop the last typed segment, turning e.g. an action URL
    /// `.../exampleResources/my-example/restart` into the resource it
    /// targets. Returns `None` when there is nothing to drop.
    pub fn truncate(&self) -> Option<Self> {
        if self.types.len() < 2 {
            return None;
        }
        let mut truncated = self.clone();
        truncated.types.pop();
        Some(truncated)
    }

    /// The name of the last typed segment's type, e.g. `exampleResources`.
    pub fn last_type_segment(&self) -> Option<&str> {
        self.types.last().map(|(type_segment, _)| type_segment.as_str())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.plane)?;
        for (key, value) in &self.scope {
            write!(f, "/{key}")?;
            if let Some(value) = value {
                write!(f, "/{value}")?;
            }
        }
        if !self.namespace.is_empty() {
            write!(f, "/providers/{}", self.namespace)?;
            for (type_segment, name) in &self.types {
                write!(f, "/{type_segment}")?;
                if let Some(name) = name {
                    write!(f, "/{name}")?;
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceId {
    type Err = InvalidResourceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceId::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ResourceId::parse(&raw).map_err(D::Error::custom)
    }
}
