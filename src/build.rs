use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::{info, warn};
use thiserror::Error;
use crate::runtime::{self, ContainerRuntime, ImageBuildRequest};

/// Build argument carrying the Docker version to install in the runtime layer.
pub const DOCKER_VERSION_ARG: &str = "DOCKER_VERSION";

/// Build argument naming the base layer the runtime layer starts `FROM`.
pub const BASE_IMAGE_ARG: &str = "BASE_IMAGE";

const BASE_TAG_SUFFIX: &str = ":base";

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported distribution: {0}")]
    UnsupportedDistribution(String),

    #[error("unsupported docker version: {0}")]
    UnsupportedRuntimeVersion(String),

    #[error("build {stage} layer: {source}")]
    BuildFailure {
        stage: Stage,
        source: runtime::Error,
    },
}

/// Linux distributions a node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distribution {
    CentOS7,
    CoreOS,
    Ubuntu1604,
    Fedora23,
    Debian8,
}

impl Distribution {
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::CentOS7 => "centos-7",
            Distribution::CoreOS => "coreos",
            Distribution::Ubuntu1604 => "ubuntu-16.04",
            Distribution::Fedora23 => "fedora-23",
            Distribution::Debian8 => "debian-8",
        }
    }

    /// Directory under `base/` holding this distribution's Dockerfile, if it has one.
    fn recipe(&self) -> Option<&'static str> {
        match self {
            Distribution::CentOS7 => Some("centos-7"),
            Distribution::CoreOS => Some("coreos"),
            _ => None,
        }
    }
}

impl FromStr for Distribution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Distribution::CentOS7,
            Distribution::CoreOS,
            Distribution::Ubuntu1604,
            Distribution::Fedora23,
            Distribution::Debian8,
        ]
        .into_iter()
        .find(|distribution| distribution.name() == s)
        .ok_or_else(|| Error::UnsupportedDistribution(s.to_string()))
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Docker versions that can be installed inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeVersion {
    V1_11_2,
    V1_13_1,
    V17_12_1Ce,
}

impl RuntimeVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeVersion::V1_11_2 => "1.11.2",
            RuntimeVersion::V1_13_1 => "1.13.1",
            RuntimeVersion::V17_12_1Ce => "17.12.1-ce",
        }
    }
}

impl FromStr for RuntimeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [RuntimeVersion::V1_11_2, RuntimeVersion::V1_13_1, RuntimeVersion::V17_12_1Ce]
            .into_iter()
            .find(|version| version.as_str() == s)
            .ok_or_else(|| Error::UnsupportedRuntimeVersion(s.to_string()))
    }
}

impl Display for RuntimeVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a locally built image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTag(pub String);

impl ImageTag {
    /// Tag of the intermediate OS layer.
    pub fn base_layer(&self) -> ImageTag {
        ImageTag(format!("{}{}", self.0, BASE_TAG_SUFFIX))
    }
}

impl Display for ImageTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that determines one node image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub tag: ImageTag,
    pub distribution: Distribution,
    pub runtime_version: RuntimeVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Operating system layer.
    Base,
    /// Docker installed on top of the base layer.
    Runtime,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Base => "base",
            Stage::Runtime => "runtime",
        })
    }
}

/// Directory tree holding the Dockerfiles:
///
/// ```text
/// <root>/base/<distribution>/Dockerfile
/// <root>/base-docker/Dockerfile
/// ```
#[derive(Debug, Clone)]
pub struct Recipes {
    root: PathBuf,
}

impl Recipes {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base(&self, distribution: Distribution) -> Result<PathBuf, Error> {
        distribution
            .recipe()
            .map(|segment| self.root.join("base").join(segment))
            .ok_or_else(|| Error::UnsupportedDistribution(distribution.to_string()))
    }

    pub fn docker(&self) -> PathBuf {
        self.root.join("base-docker")
    }
}

/// Build the two layers of a node image and return the tag of the runtime layer.
///
/// Unsupported inputs are rejected before the runtime is touched. If either layer fails,
/// the runtime tag is removed so that it never names an image built from another spec.
pub fn build<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    recipes: &Recipes,
    spec: &BuildSpec,
) -> Result<ImageTag, Error> {
    let base_context = recipes.base(spec.distribution)?;
    let docker_version = spec.runtime_version.as_str();
    let base_tag = spec.tag.base_layer();

    info!("Building {} layer {} from {}", Stage::Base, base_tag, base_context.display());
    let base = ImageBuildRequest {
        context: base_context,
        tag: base_tag.0.clone(),
        build_args: BTreeMap::new(),
    };
    runtime
        .build_image(&base)
        .map_err(|source| abandon(runtime, spec, Stage::Base, source))?;

    info!("Building {} layer {} with Docker {}", Stage::Runtime, spec.tag, docker_version);
    let docker = ImageBuildRequest {
        context: recipes.docker(),
        tag: spec.tag.0.clone(),
        build_args: BTreeMap::from([
            (BASE_IMAGE_ARG.to_string(), base_tag.0.clone()),
            (DOCKER_VERSION_ARG.to_string(), docker_version.to_string()),
        ]),
    };
    runtime
        .build_image(&docker)
        .map_err(|source| abandon(runtime, spec, Stage::Runtime, source))?;

    Ok(spec.tag.clone())
}

fn abandon<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    spec: &BuildSpec,
    stage: Stage,
    source: runtime::Error,
) -> Error {
    if let Err(err) = runtime.remove_image(&spec.tag.0) {
        warn!("Could not remove stale image {}: {}", spec.tag, err);
    }
    Error::BuildFailure { stage, source }
}
