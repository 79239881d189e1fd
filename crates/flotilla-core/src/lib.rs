//! flotilla-core — shared types for the Flotilla provisioning engine.
//!
//! Holds the immutable node templates, the label-expression matcher used
//! to route demand onto templates, and the `flotilla.toml` parser.

pub mod config;
pub mod error;
pub mod label;
pub mod template;

pub use config::{CloudConfig, CredentialEntry, FlotillaConfig, ProvisioningConfig};
pub use error::{ConfigError, ConfigResult, LabelError};
pub use label::{ExpressionMatcher, LabelMatcher, LabelSet};
pub use template::{InstanceSize, SlaveTemplate};
