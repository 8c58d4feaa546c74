//! Capability interface to the container runtime.
//!
//! Everything that touches images or containers goes through [`ContainerRuntime`],
//! so the build pipeline and the topology view can be exercised without a daemon.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("`{command}` failed with exit code {}: {stderr}", exit_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("decode runtime output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

fn exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

/// Input to a single image build.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuildRequest {
    /// Directory containing the Dockerfile.
    pub context: PathBuf,

    /// Tag applied to the built image.
    pub tag: String,

    /// Values for `ARG` instructions in the Dockerfile.
    pub build_args: BTreeMap<String, String>,
}

/// Select containers by label key, optionally pinned to a value.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelFilter {
    pub key: String,
    pub value: Option<String>,
}

impl LabelFilter {
    pub fn present(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
        }
    }

    pub fn equals(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }

    /// Render as the runtime's `label=` filter expression.
    pub fn expression(&self) -> String {
        match &self.value {
            None => format!("label={}", self.key),
            Some(value) => format!("label={}={}", self.key, value),
        }
    }
}

/// Facts about one running container, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSummary {
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    pub ip_address: String,
    pub labels: HashMap<String, String>,
}

pub trait ContainerRuntime {
    /// Build and tag an image. Intermediate containers are removed whether or not the build succeeds.
    fn build_image(&self, request: &ImageBuildRequest) -> Result<(), Error>;

    /// Remove a tag from the local image store. Removing a tag that does not exist is not an error.
    fn remove_image(&self, tag: &str) -> Result<(), Error>;

    /// Running containers matching every filter.
    fn list_containers(&self, filters: &[LabelFilter]) -> Result<Vec<ContainerSummary>, Error>;
}
