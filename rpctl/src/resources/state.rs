//! Resource provisioning states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a resource or an asynchronous operation.
///
/// Serialized with the exact PascalCase names clients see in
/// `provisioningState` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    None,
    Updating,
    Deleting,
    Accepted,
    Succeeded,
    Provisioning,
    Provisioned,
    Failed,
    Canceled,
    Undefined,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::None => "None",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Accepted => "Accepted",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Provisioning => "Provisioning",
            ProvisioningState::Provisioned => "Provisioned",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Canceled => "Canceled",
            ProvisioningState::Undefined => "Undefined",
        }
    }

    /// Whether the state ends an operation's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }

    /// String-level terminality. The empty string counts as terminal: it is
    /// what synchronously completed resources carry.
    pub fn is_terminal_str(value: &str) -> bool {
        if value.is_empty() {
            return true;
        }
        value
            .parse::<ProvisioningState>()
            .map(|state| state.is_terminal())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provisioning state: {0}")]
pub struct UnknownProvisioningState(String);

impl std::str::FromStr for ProvisioningState {
    type Err = UnknownProvisioningState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ProvisioningState::None),
            "updating" => Ok(ProvisioningState::Updating),
            "deleting" => Ok(ProvisioningState::Deleting),
            "accepted" => Ok(ProvisioningState::Accepted),
            "succeeded" => Ok(ProvisioningState::Succeeded),
            "provisioning" => Ok(ProvisioningState::Provisioning),
            "provisioned" => Ok(ProvisioningState::Provisioned),
            "failed" => Ok(ProvisioningState::Failed),
            "canceled" => Ok(ProvisioningState::Canceled),
            "undefined" => Ok(ProvisioningState::Undefined),
            other => Err(UnknownProvisioningState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Failed.is_terminal());
        assert!(ProvisioningState::Canceled.is_terminal());
        for state in [
            ProvisioningState::None,
            ProvisioningState::Updating,
            ProvisioningState::Deleting,
            ProvisioningState::Accepted,
            ProvisioningState::Provisioning,
            ProvisioningState::Provisioned,
            ProvisioningState::Undefined,
        ] {
            assert!(!state.is_terminal(), "{state} must not be terminal");
        }
    }

    #[test]
    fn empty_string_is_terminal() {
        assert!(ProvisioningState::is_terminal_str(""));
        assert!(ProvisioningState::is_terminal_str("succeeded"));
        assert!(ProvisioningState::is_terminal_str("Failed"));
        assert!(!ProvisioningState::is_terminal_str("Accepted"));
        assert!(!ProvisioningState::is_terminal_str("garbage"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            "SUCCEEDED".parse::<ProvisioningState>().unwrap(),
            ProvisioningState::Succeeded
        );
        assert!("sort-of-done".parse::<ProvisioningState>().is_err());
    }

    #[test]
    fn serde_uses_pascal_case() {
        let json = serde_json::to_string(&ProvisioningState::Succeeded).unwrap();
        assert_eq!(json, "\"Succeeded\"");
        let state: ProvisioningState = serde_json::from_str("\"Canceled\"").unwrap();
        assert_eq!(state, ProvisioningState::Canceled);
    }
}
