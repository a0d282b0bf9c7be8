//! Controller invocation results.

use crate::errors::{codes, ErrorDetails};
use crate::resources::ProvisioningState;

/// Terminal (or requeue) outcome of one controller invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Leave the message unacknowledged so the broker redelivers it after
    /// the visibility timeout.
    pub requeue: bool,
    /// Final provisioning state; `None` reads as `Succeeded`.
    pub state: Option<ProvisioningState>,
    pub error: Option<ErrorDetails>,
}

impl Default for OperationResult {
    fn default() -> Self {
        Self {
            requeue: false,
            state: Some(ProvisioningState::Succeeded),
            error: None,
        }
    }
}

impl OperationResult {
    /// Successful terminal result.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failed(error: ErrorDetails) -> Self {
        Self {
            requeue: false,
            state: Some(ProvisioningState::Failed),
            error: Some(error),
        }
    }

    pub fn new_canceled(message: impl Into<String>) -> Self {
        Self {
            requeue: false,
            state: Some(ProvisioningState::Canceled),
            error: Some(ErrorDetails::new(codes::OPERATION_CANCELED, message)),
        }
    }

    pub fn provisioning_state(&self) -> ProvisioningState {
        self.state.unwrap_or(ProvisioningState::Succeeded)
    }
}
