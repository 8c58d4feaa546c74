//! Fixtures for container-backed test clusters.
//!
//! Builds the Docker images used as the filesystems of cluster nodes, detects the
//! variant of an installer, and turns node references into running containers.

pub mod build;
pub mod config;
pub mod docker;
pub mod node;
pub mod runtime;
pub mod topology;
pub mod variant;
