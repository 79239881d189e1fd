//! flotilla-provision — turns demand into running, registered nodes.
//!
//! ```text
//! CloudProvisioner::provision(label, units)
//!   ├── first template whose labels satisfy `label`
//!   └── one ProvisioningTask per unit, each on its own tokio task
//!         NAMING → LAUNCHING → WAITING → READY
//!                      │           ├──→ TIMED_OUT   (deregister + terminate)
//!                      │           └──→ FAILED      (vanished / cancelled)
//!                      └──→ LAUNCH_FAILED           (deregister, terminate if an id was printed)
//! ```
//!
//! Faults stay inside their task. `provision` itself never fails; callers
//! learn about each unit through its [`PendingUnit`].

pub mod error;
pub mod name;
pub mod provisioner;
pub mod secret;
pub mod task;

pub use error::{ProvisionError, ProvisionResult};
pub use name::{next_stamp, node_name, sanitize_label};
pub use provisioner::{CloudProvisioner, DEFAULT_MAX_UNITS_PER_REQUEST, PendingUnit};
pub use secret::{connection_secret, verify_connection_secret};
pub use task::{ProvisionedNode, ProvisioningTask, TaskContext, TaskState};
