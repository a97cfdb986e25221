//! Node installers.

pub mod probe;
pub mod steps;

pub use probe::{docker_installer, ProbeInstaller};
pub use steps::StepInstaller;
