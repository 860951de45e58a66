//! Container locator/launcher and readiness prober.
//!
//! Given an image reference, [`ContainerLauncher`] finds the running container
//! for it or starts one, and reports the host port bound to the supervisor's
//! internal port. [`ReadinessProbe`] then waits for that supervisor to answer
//! its health endpoint before any run-specific call is made.

pub mod error;
pub mod launcher;
pub mod readiness;
pub mod runtime;

pub use error::{LaunchError, ReadinessError};
pub use launcher::{ContainerHandle, ContainerLauncher};
pub use readiness::ReadinessProbe;
pub use runtime::{ContainerRuntime, DockerCli};
