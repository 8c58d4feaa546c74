//! Detect whether an installer is an Enterprise or an open source build.
//!
//! Installers report their version when run with `--version`, but the report is
//! interleaved with progress output from unpacking the bundled images. A
//! [`NoiseFilter`] strips that output before the JSON payload is parsed.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Mutex;
use log::{debug, info};
use thiserror::Error;

/// Argument that makes an installer print its version report.
pub const VERSION_FLAG: &str = "--version";

/// `variant` value reported by Enterprise installers.
const ENTERPRISE_VARIANT: &str = "ee";

pub const DEFAULT_NOISE_PREFIXES: [&str; 2] = ["Extracting image", "Loaded image"];
pub const DEFAULT_NOISE_SUBSTRINGS: [&str; 1] = [".tar"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("installer version report failed: {stderr}")]
    ProbeExecutionFailure { stderr: String },

    #[error("malformed installer version report ({reason}): {stderr}")]
    MalformedVersionReport { reason: String, stderr: String },

    #[error("read {}: {err}", .path.display())]
    ReadArtifact { err: std::io::Error, path: PathBuf },

    #[error("an installer is required to detect the variant automatically")]
    ArtifactRequired,

    #[error("unknown variant `{0}`, expected one of: auto, enterprise, oss")]
    UnknownVariantChoice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactVariant {
    Enterprise,
    OpenSource,
}

impl Display for ArtifactVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ArtifactVariant::Enterprise => "enterprise",
            ArtifactVariant::OpenSource => "oss",
        })
    }
}

/// Lines of installer output that are not part of the version report.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseFilter {
    /// Lines starting with any of these are dropped.
    pub prefixes: Vec<String>,
    /// Lines containing any of these are dropped.
    pub substrings: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_NOISE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            substrings: DEFAULT_NOISE_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NoiseFilter {
    pub fn is_noise(&self, line: &str) -> bool {
        self.prefixes.iter().any(|prefix| line.starts_with(prefix.as_str()))
            || self.substrings.iter().any(|needle| line.contains(needle.as_str()))
    }

    /// Drop noise lines and join what remains with single spaces.
    pub fn extract_payload(&self, output: &str) -> String {
        output
            .lines()
            .filter(|line| !self.is_noise(line))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parse the payload left over by [`NoiseFilter::extract_payload`].
pub fn parse_report(payload: &str) -> Result<ArtifactVariant, String> {
    if payload.trim().is_empty() {
        return Err("no output left after removing progress lines".into());
    }
    let report: serde_json::Value = serde_json::from_str(payload).map_err(|err| err.to_string())?;
    let variant = report
        .get("variant")
        .ok_or_else(|| "missing field `variant`".to_string())?;
    Ok(if variant == ENTERPRISE_VARIANT {
        ArtifactVariant::Enterprise
    } else {
        ArtifactVariant::OpenSource
    })
}

/// Anything that can tell the variant of an installer.
pub trait Classifier {
    fn classify(&self, artifact: &Path, workspace_dir: &Path) -> Result<ArtifactVariant, Error>;
}

/// Runs installers to ask them for their variant.
#[derive(Debug, Clone)]
pub struct VariantProbe {
    /// Installers are shell scripts with a binary payload.
    interpreter: String,
    filter: NoiseFilter,
}

impl Default for VariantProbe {
    fn default() -> Self {
        Self::new("bash", NoiseFilter::default())
    }
}

impl VariantProbe {
    pub fn new(interpreter: &str, filter: NoiseFilter) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            filter,
        }
    }

    pub fn filter(&self) -> &NoiseFilter {
        &self.filter
    }
}

impl Classifier for VariantProbe {
    /// Run `artifact --version` inside `workspace_dir` and classify the result.
    ///
    /// The installer may unpack large files into `workspace_dir`. The caller creates and
    /// removes the directory, and must not share it between concurrent probes.
    fn classify(&self, artifact: &Path, workspace_dir: &Path) -> Result<ArtifactVariant, Error> {
        debug!(
            "Running {} {} {} in {}",
            self.interpreter,
            artifact.display(),
            VERSION_FLAG,
            workspace_dir.display()
        );
        let output = std::process::Command::new(&self.interpreter)
            .arg(artifact)
            .arg(VERSION_FLAG)
            .current_dir(workspace_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| Error::ProbeExecutionFailure {
                stderr: format!("cannot run {}: {}", self.interpreter, err),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::ProbeExecutionFailure { stderr });
        }

        let payload = self.filter.extract_payload(&String::from_utf8_lossy(&output.stdout));
        debug!("Installer version report: {payload}");
        let variant = parse_report(&payload)
            .map_err(|reason| Error::MalformedVersionReport { reason, stderr })?;
        info!("{} is a {} installer", artifact.display(), variant);
        Ok(variant)
    }
}

/// Remembers the variant of every installer it has classified, keyed by content digest.
#[derive(Debug, Default)]
pub struct VariantCache {
    probe: VariantProbe,
    known: Mutex<HashMap<String, ArtifactVariant>>,
}

impl VariantCache {
    pub fn new(probe: VariantProbe) -> Self {
        Self {
            probe,
            known: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, digest: &str) -> Option<ArtifactVariant> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(digest)
            .copied()
    }
}

impl Classifier for VariantCache {
    fn classify(&self, artifact: &Path, workspace_dir: &Path) -> Result<ArtifactVariant, Error> {
        let digest = sha256::try_digest(artifact).map_err(|err| Error::ReadArtifact {
            err,
            path: artifact.to_path_buf(),
        })?;

        if let Some(variant) = self.lookup(&digest) {
            debug!("{} ({digest}) already classified as {variant}", artifact.display());
            return Ok(variant);
        }

        // The lock is not held while the installer runs.
        let variant = self.probe.classify(artifact, workspace_dir)?;
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(digest, variant);
        Ok(variant)
    }
}

/// Variant requested by a user: explicit, or detected from the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantChoice {
    Auto,
    Enterprise,
    OpenSource,
}

impl FromStr for VariantChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(VariantChoice::Auto),
            "enterprise" => Ok(VariantChoice::Enterprise),
            "oss" => Ok(VariantChoice::OpenSource),
            other => Err(Error::UnknownVariantChoice(other.to_string())),
        }
    }
}

impl VariantChoice {
    /// Explicit choices win; `Auto` classifies `artifact`.
    pub fn resolve<C: Classifier + ?Sized>(
        self,
        classifier: &C,
        artifact: Option<&Path>,
        workspace_dir: &Path,
    ) -> Result<ArtifactVariant, Error> {
        match self {
            VariantChoice::Enterprise => Ok(ArtifactVariant::Enterprise),
            VariantChoice::OpenSource => Ok(ArtifactVariant::OpenSource),
            VariantChoice::Auto => {
                let artifact = artifact.ok_or(Error::ArtifactRequired)?;
                classifier.classify(artifact, workspace_dir)
            }
        }
    }
}
