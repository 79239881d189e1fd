//! flotillad — the Flotilla daemon.
//!
//! Hosts one [`CloudProvisioner`](flotilla_provision::CloudProvisioner)
//! behind a REST API. The daemon is also the host orchestrator: provisioned
//! agents call back into it to report themselves online, which is what a
//! waiting provisioning task polls for.

pub mod api;
pub mod dry_run;

pub use api::{AppState, build_router};
