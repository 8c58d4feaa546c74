use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use std::time::Duration;
use log::debug;
use serde::Deserialize;
use crate::runtime::{ContainerRuntime, ContainerSummary, Error, ImageBuildRequest, LabelFilter};

/// [`ContainerRuntime`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn run<I>(&self, args: I) -> Result<Output, Error>
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        debug!("Running {} {}", self.binary, render(&args));
        retry_busy(|| {
            std::process::Command::new(&self.binary)
                .args(&args)
                .stdin(Stdio::null())
                .output()
        })
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                Error::Unavailable(format!("cannot execute {}: {}", self.binary, err))
            }
            _ => Error::IOError(err),
        })
    }

    fn failed(&self, args: &[OsString], output: &Output) -> Error {
        Error::CommandFailed {
            command: format!("{} {}", self.binary, render(args)),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Spawns attempted while the binary is still open for writing somewhere.
const SPAWN_ATTEMPTS: u32 = 5;

fn retry_busy<T>(mut spawn: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
    let mut attempt = 1;
    loop {
        match spawn() {
            Err(err) if err.kind() == ErrorKind::ExecutableFileBusy && attempt < SPAWN_ATTEMPTS => {
                debug!("Spawn attempt {attempt} failed: {err}");
                std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn render(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn build_args(request: &ImageBuildRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "build".into(),
        "--rm".into(),
        "--force-rm".into(),
        "--tag".into(),
        request.tag.clone().into(),
    ];
    for (key, value) in &request.build_args {
        args.push("--build-arg".into());
        args.push(format!("{key}={value}").into());
    }
    args.push(request.context.clone().into_os_string());
    args
}

pub fn ps_args(filters: &[LabelFilter]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["ps".into(), "--no-trunc".into(), "--quiet".into()];
    for filter in filters {
        args.push("--filter".into());
        args.push(filter.expression().into());
    }
    args
}

impl ContainerRuntime for DockerCli {
    fn build_image(&self, request: &ImageBuildRequest) -> Result<(), Error> {
        let args = build_args(request);
        let output = self.run(args.clone())?;
        if output.status.success() {
            debug!("Built image {}", request.tag);
            Ok(())
        } else {
            Err(self.failed(&args, &output))
        }
    }

    fn remove_image(&self, tag: &str) -> Result<(), Error> {
        let args: Vec<OsString> = vec!["image".into(), "rm".into(), "--force".into(), tag.into()];
        let output = self.run(args.clone())?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || stderr.contains("No such image") {
            Ok(())
        } else {
            Err(self.failed(&args, &output))
        }
    }

    fn list_containers(&self, filters: &[LabelFilter]) -> Result<Vec<ContainerSummary>, Error> {
        let args = ps_args(filters);
        let output = self.run(args.clone())?;
        if !output.status.success() {
            // `docker ps` only fails when the daemon is unreachable or refuses us.
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Unavailable(stderr));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!("{} containers match {}", ids.len(), render(&args));
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut inspect: Vec<OsString> = vec!["inspect".into()];
        inspect.extend(ids.iter().map(OsString::from));
        let output = self.run(inspect.clone())?;

        // A container removed between `ps` and `inspect` makes `inspect` exit non-zero,
        // but the remaining containers are still printed.
        match parse_inspect(&output.stdout) {
            Ok(containers) => {
                if !output.status.success() {
                    debug!(
                        "docker inspect reported: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(containers)
            }
            Err(_) if !output.status.success() => Err(self.failed(&inspect, &output)),
            Err(err) => Err(err),
        }
    }
}

/// Parse the JSON array printed by `docker inspect`.
pub fn parse_inspect(stdout: &[u8]) -> Result<Vec<ContainerSummary>, Error> {
    let inspected: Vec<inspect::Container> = serde_json::from_slice(stdout)?;
    Ok(inspected.into_iter().map(summarize).collect())
}

fn summarize(container: inspect::Container) -> ContainerSummary {
    let settings = container.network_settings;
    // Containers on user-defined networks leave the top-level address empty.
    let ip_address = if settings.ip_address.is_empty() {
        settings
            .networks
            .unwrap_or_default()
            .into_values()
            .map(|network| network.ip_address)
            .find(|ip| !ip.is_empty())
            .unwrap_or_default()
    } else {
        settings.ip_address
    };

    ContainerSummary {
        id: container.id,
        name: container.name.trim_start_matches('/').to_string(),
        ip_address,
        labels: container.config.labels.unwrap_or_default(),
    }
}

mod inspect {
    use super::*;

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Container {
        pub id: String,
        pub name: String,
        pub config: Config,
        pub network_settings: NetworkSettings,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Config {
        #[serde(default)]
        pub labels: Option<HashMap<String, String>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct NetworkSettings {
        #[serde(rename = "IPAddress", default)]
        pub ip_address: String,
        #[serde(default)]
        pub networks: Option<BTreeMap<String, Network>>,
    }

    #[derive(Deserialize)]
    pub struct Network {
        #[serde(rename = "IPAddress", default)]
        pub ip_address: String,
    }
}
