//! Cluster node registry and the installers that prepare nodes.

mod images;
mod installer;
mod manager;

pub use images::{list_images_command, parse_images, DockerImage};
pub use installer::Installer;
pub use manager::{TopologyEvent, TopologyManager};
