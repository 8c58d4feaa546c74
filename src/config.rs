use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;
use crate::build::Recipes;
use crate::topology::LabelKeys;
use crate::variant::{NoiseFilter, VariantProbe};

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse {path}: {err}")]
    Parse {
        err: toml::de::Error,
        path: String,
    },
}

/// A nodekit.toml file.
#[derive(Deserialize, Debug)]
pub struct File {
    pub description: Option<String>,
    #[serde(default = "Default::default")]
    pub docker: Docker,
    #[serde(default = "Default::default")]
    pub labels: Labels,
    #[serde(default = "Default::default")]
    pub image: Image,
    #[serde(default = "Default::default")]
    pub probe: Probe,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Load `path` on top of the built-in defaults.
    ///
    /// Tables are merged key by key, so a user file only needs the settings it changes.
    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let user = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.to_string(),
        })?;
        Self::merged(&user).map_err(|err| Error::Parse {
            err,
            path: path.to_string(),
        })
    }

    fn merged(user: &str) -> Result<Self, toml::de::Error> {
        let mut config: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        merge(&mut config, toml::from_str(user)?);
        toml::Value::Table(config).try_into()
    }

    pub fn recipes(&self) -> Recipes {
        Recipes::new(&self.image.recipes_dir)
    }

    pub fn label_keys(&self) -> LabelKeys {
        LabelKeys {
            cluster_id: self.labels.cluster_id.clone(),
            node_type: self.labels.node_type.clone(),
            node_reference: self.labels.node_reference.clone(),
        }
    }

    pub fn variant_probe(&self) -> VariantProbe {
        VariantProbe::new(
            &self.probe.interpreter,
            NoiseFilter {
                prefixes: self.probe.noise_prefixes.clone(),
                substrings: self.probe.noise_substrings.clone(),
            },
        )
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(overlay) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge(existing, overlay),
                _ => {
                    base.insert(key, toml::Value::Table(overlay));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct Docker {
    #[serde_inline_default("docker".to_string())]
    pub binary: String,
}

impl Default for Docker {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Labels {
    pub cluster_id: String,
    pub node_type: String,
    pub node_reference: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct Image {
    pub recipes_dir: String,
    pub tag: String,
    pub distribution: String,
    pub docker_version: String,
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct Probe {
    #[serde_inline_default("bash".to_string())]
    pub interpreter: String,
    #[serde(default = "Vec::new")]
    pub noise_prefixes: Vec<String>,
    #[serde(default = "Vec::new")]
    pub noise_substrings: Vec<String>,
}

impl Default for Probe {
    fn default() -> Self {
        let filter = NoiseFilter::default();
        Self {
            interpreter: "bash".to_string(),
            noise_prefixes: filter.prefixes,
            noise_substrings: filter.substrings,
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::build::{Distribution, RuntimeVersion};

    #[test]
    pub fn load_default_configuration() {
        let cfg = File::default();
        assert_eq!(cfg.description, Some("Default configuration file".into()));
        assert_eq!(cfg.docker.binary, "docker");
        assert_eq!(cfg.label_keys(), LabelKeys::default());
        assert_eq!(cfg.variant_probe().filter(), &NoiseFilter::default());
        assert_eq!(cfg.image.distribution.parse::<Distribution>().unwrap(), Distribution::CentOS7);
        assert_eq!(cfg.image.docker_version.parse::<RuntimeVersion>().unwrap(), RuntimeVersion::V1_13_1);
    }

    #[test]
    pub fn user_file_overrides_only_its_keys() {
        let cfg = File::merged(
            r#"
            [labels]
            cluster_id = "e2e.cluster"

            [probe]
            noise_prefixes = ["Extracting image", "Loaded image", "Unpacking"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.labels.cluster_id, "e2e.cluster");
        assert_eq!(cfg.labels.node_type, "dcos_e2e.node_type");
        assert_eq!(cfg.probe.noise_prefixes.len(), 3);
        assert_eq!(cfg.probe.noise_substrings, vec![".tar".to_string()]);
        assert_eq!(cfg.image.tag, "dcos-e2e-node");
    }

    #[test]
    pub fn read_user_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodekit.toml");
        std::fs::write(&path, "[docker]\nbinary = \"/usr/local/bin/docker\"\n").unwrap();
        let cfg = File::default_with_user_config_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.docker.binary, "/usr/local/bin/docker");
        assert_eq!(cfg.recipes().root(), std::path::Path::new("resources/dockerfiles"));
    }

    #[test]
    pub fn invalid_user_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodekit.toml");
        std::fs::write(&path, "[labels\n").unwrap();
        assert!(matches!(
            File::default_with_user_config_file(path.to_str().unwrap()),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            File::default_with_user_config_file("/nonexistent/nodekit.toml"),
            Err(Error::ReadFile { .. })
        ));
    }
}
