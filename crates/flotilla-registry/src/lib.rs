//! flotilla-registry — the collaborators the provisioning core talks to.
//!
//! - [`NodeRegistry`]: the host orchestrator's set of registered nodes.
//!   The core registers a node before launching its backing instance,
//!   polls whether the node's agent is online, and deregisters it on
//!   failure or retirement.
//! - [`CredentialStore`]: resolves an opaque credentials id to an
//!   access/secret key pair.
//!
//! Each trait has one production adapter here ([`InMemoryRegistry`],
//! [`ConfigCredentialStore`]); both double as test fakes.

pub mod credentials;
pub mod error;
pub mod node;
pub mod registry;

pub use credentials::{ConfigCredentialStore, CredentialStore, Credentials, Secret};
pub use error::{RegistryError, RegistryResult};
pub use node::{Node, NodeStatus, NodeView};
pub use registry::{InMemoryRegistry, NodeRegistry};
