//! Operation types: the canonical `(resource type, method)` routing key.
//!
//! An operation type identifies one operation against one resource type, in
//! the form `TYPE|METHOD` with both halves upper-cased, e.g.
//! `APPLICATIONS.CORE/ENVIRONMENTS|PUT`. It is the key for both controller
//! registries and travels inside queued work requests.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SEPARATOR: char = '|';
const ACTION_PREFIX: &str = "ACTION";

/// The method half of an operation type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationMethod {
    List,
    ListPlaneScope,
    Get,
    Put,
    Patch,
    Delete,
    PutSubscriptions,
    Post,
    GetImperative,
    PutImperative,
    DeleteImperative,
    Proxy,
    /// Custom action; the payload is the upper-cased action name.
    Action(String),
}

impl OperationMethod {
    /// Custom action method for `name`, upper-casing it.
    pub fn action(name: &str) -> Self {
        OperationMethod::Action(name.to_uppercase())
    }
}

impl std::fmt::Display for OperationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationMethod::List => f.write_str("LIST"),
            OperationMethod::ListPlaneScope => f.write_str("LISTPLANESCOPE"),
            OperationMethod::Get => f.write_str("GET"),
            OperationMethod::Put => f.write_str("PUT"),
            OperationMethod::Patch => f.write_str("PATCH"),
            OperationMethod::Delete => f.write_str("DELETE"),
            OperationMethod::PutSubscriptions => f.write_str("PUTSUBSCRIPTIONS"),
            OperationMethod::Post => f.write_str("POST"),
            OperationMethod::GetImperative => f.write_str("GETIMPERATIVE"),
            OperationMethod::PutImperative => f.write_str("PUTIMPERATIVE"),
            OperationMethod::DeleteImperative => f.write_str("DELETEIMPERATIVE"),
            OperationMethod::Proxy => f.write_str("PROXY"),
            OperationMethod::Action(name) => write!(f, "{ACTION_PREFIX}{name}"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid operation type: {0}")]
pub struct InvalidOperationType(pub String);

impl std::str::FromStr for OperationMethod {
    type Err = InvalidOperationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        match upper.as_str() {
            "LIST" => Ok(OperationMethod::List),
            "LISTPLANESCOPE" => Ok(OperationMethod::ListPlaneScope),
            "GET" => Ok(OperationMethod::Get),
            "PUT" => Ok(OperationMethod::Put),
            "PATCH" => Ok(OperationMethod::Patch),
            "DELETE" => Ok(OperationMethod::Delete),
            "PUTSUBSCRIPTIONS" => Ok(OperationMethod::PutSubscriptions),
            "POST" => Ok(OperationMethod::Post),
            "GETIMPERATIVE" => Ok(OperationMethod::GetImperative),
            "PUTIMPERATIVE" => Ok(OperationMethod::PutImperative),
            "DELETEIMPERATIVE" => Ok(OperationMethod::DeleteImperative),
            "PROXY" => Ok(OperationMethod::Proxy),
            _ => match upper.strip_prefix(ACTION_PREFIX) {
                Some(suffix) if !suffix.is_empty() => {
                    Ok(OperationMethod::Action(suffix.to_string()))
                }
                _ => Err(InvalidOperationType(s.to_string())),
            },
        }
    }
}

/// Canonical `(resource type, method)` pair, case-normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationType {
    /// Provider-qualified resource type, e.g. `APPLICATIONS.CORE/ENVIRONMENTS`.
    pub type_name: String,
    pub method: OperationMethod,
}

impl OperationType {
    pub fn new(type_name: &str, method: OperationMethod) -> Self {
        Self {
            type_name: type_name.to_uppercase(),
            method,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.type_name, self.method)
    }
}

impl std::str::FromStr for OperationType {
    type Err = InvalidOperationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(type_name), Some(method), None) if !type_name.is_empty() => Ok(Self {
                type_name: type_name.to_uppercase(),
                method: method.parse()?,
            }),
            _ => Err(InvalidOperationType(s.to_string())),
        }
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
