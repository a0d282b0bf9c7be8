//! Resource identity and lifecycle primitives: ids, operation types, and
//! provisioning states.

pub mod id;
pub mod operation;
pub mod state;

pub use id::{InvalidResourceId, PlaneScope, ResourceId};
pub use operation::{InvalidOperationType, OperationMethod, OperationType};
pub use state::ProvisioningState;
