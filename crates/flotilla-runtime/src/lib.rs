//! flotilla-runtime — everything that shells out to the runtime CLI.
//!
//! # Commands
//!
//! ```text
//! <cli> config <server>                                      config artifact (keys via env)
//! <cli> --config <dir> run -d --workdir <root> --label <key>=<label>
//!       -e <callback-env>=<url> --size <size> <image> <secret> <name>   launch
//! <cli> rm -v -f <instance>                                   terminate
//! ```
//!
//! All commands go through a [`CommandRunner`] so the provisioning core can
//! be exercised without a real runtime. Nothing here retries: a single
//! non-zero exit is reported to the caller as-is.

pub mod artifact;
pub mod command;
pub mod error;
pub mod launcher;
pub mod terminator;

pub use artifact::{ArtifactSource, ConfigArtifact};
pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner, ScriptedRunner};
pub use error::{ArtifactError, CleanupError, LaunchError, TerminateError};
pub use launcher::{InstanceId, InstanceLauncher, LaunchOutput, LaunchRequest};
pub use terminator::InstanceTerminator;
