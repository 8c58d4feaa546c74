//! nodekit command line interface.
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use log::{debug, error, info};
use thiserror::Error;
use nodekit::build::{BuildSpec, Distribution, ImageTag, RuntimeVersion};
use nodekit::docker::DockerCli;
use nodekit::node::NodeResolver;
use nodekit::topology::ContainerTopology;
use nodekit::variant::VariantChoice;
use nodekit::{build, config, node, topology, variant};

/// Build node images and address the nodes of container-backed test clusters.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the Docker image used for node containers.
    BuildImage {
        /// Tag of the resulting image. The OS layer is tagged `<TAG>:base`.
        #[arg(long)]
        tag: Option<String>,

        /// One of centos-7, coreos.
        #[arg(long)]
        distribution: Option<String>,

        /// Docker version installed inside the nodes: 1.11.2, 1.13.1 or 17.12.1-ce.
        #[arg(long)]
        docker_version: Option<String>,
    },
    /// Print whether an installer is an Enterprise or an open source build.
    Variant {
        /// Path to the installer. Required with `--variant auto`.
        artifact: Option<PathBuf>,

        /// One of auto, enterprise, oss. `auto` runs the installer to find out.
        #[arg(long, default_value = "auto")]
        variant: String,

        /// Directory in which to create the scratch workspace.
        #[arg(long)]
        workspace_dir: Option<PathBuf>,
    },
    /// List the IDs of existing clusters.
    Clusters,
    /// Show the nodes of a cluster.
    Inspect {
        cluster_id: String,
    },
    /// Show the node matching an IP address, container name, container ID or node reference.
    Node {
        cluster_id: String,
        reference: String,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),

    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("image build: {0}")]
    Build(#[from] build::Error),

    #[error("installer variant: {0}")]
    Variant(#[from] variant::Error),

    #[error("{0}")]
    Topology(#[from] topology::Error),

    #[error("{0}")]
    Node(#[from] node::Error),

    #[error("render output: {0}")]
    Render(#[from] serde_json::Error),
}

/// Read configuration file from disk and merge it with the
/// `default.toml` [built-in config](../default.toml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists on disk.
/// If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "nodekit.toml";

    let config_file = match &args.config {
        None => std::fs::metadata(DEFAULT_CONFIG_FILE)
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
            .then(|| DEFAULT_CONFIG_FILE.to_string()),
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        debug!("Reading configuration from {config_file}");
        config::File::default_with_user_config_file(&config_file)?
    } else {
        config::File::default()
    })
}

fn main() {
    match run() {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;
    let docker = DockerCli::new(&cfg.docker.binary);
    let labels = cfg.label_keys();

    match args.command {
        Commands::BuildImage { tag, distribution, docker_version } => {
            let spec = BuildSpec {
                tag: ImageTag(tag.unwrap_or_else(|| cfg.image.tag.clone())),
                distribution: distribution
                    .as_deref()
                    .unwrap_or(&cfg.image.distribution)
                    .parse::<Distribution>()?,
                runtime_version: docker_version
                    .as_deref()
                    .unwrap_or(&cfg.image.docker_version)
                    .parse::<RuntimeVersion>()?,
            };
            info!(
                "Building {} for {} with Docker {}",
                spec.tag, spec.distribution, spec.runtime_version
            );
            let tag = build::build(&docker, &cfg.recipes(), &spec)?;
            println!("{tag}");
            Ok(())
        }
        Commands::Variant { artifact, variant, workspace_dir } => {
            let choice = variant.parse::<VariantChoice>()?;
            // Removed when dropped, whichever way the probe ends.
            let workspace = match workspace_dir {
                Some(parent) => tempfile::tempdir_in(parent)?,
                None => tempfile::tempdir()?,
            };
            // One installer per process, so there is nothing to cache.
            let variant = choice.resolve(&cfg.variant_probe(), artifact.as_deref(), workspace.path())?;
            println!("{variant}");
            Ok(())
        }
        Commands::Clusters => {
            for cluster_id in ContainerTopology::new(&docker, &labels).cluster_ids()? {
                println!("{cluster_id}");
            }
            Ok(())
        }
        Commands::Inspect { cluster_id } => {
            let containers = ContainerTopology::new(&docker, &labels).list(&cluster_id)?;
            println!("{}", serde_json::to_string_pretty(&containers)?);
            Ok(())
        }
        Commands::Node { cluster_id, reference } => {
            let resolver = NodeResolver::new(ContainerTopology::new(&docker, &labels));
            let handle = resolver.resolve(&cluster_id, &reference)?;
            println!("{}", serde_json::to_string_pretty(&handle)?);
            Ok(())
        }
    }
}
