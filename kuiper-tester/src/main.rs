//! Kuiper tester - Main entry point
//!
//! Composes the tester topology from a config file and prints the resulting
//! deployment manifest.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kuiper_tester::config::{self, Config};
use kuiper_tester::params;
use kuiper_tester::{
    Deployable, KeyAlgorithm, KeyMaterial, KeyPair, Manifest, Placement, TemplateDir, Topology,
};

/// Kuiper tester - Composes the release relay and Jenkins tester topology
#[derive(Parser)]
#[command(name = "kuiper-tester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value_os_t = Config::default_path())]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the topology and emit its deployment manifest
    Compose {
        /// Output path (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Provider to place both components on
        #[arg(long)]
        placement_provider: Option<String>,

        /// Floating IP to attach to both components
        #[arg(long)]
        floating_ip: Option<String>,
    },

    /// Generate a key pair to import via `keys.user_key_path` or `keys.host_key_path`
    Keygen {
        #[arg(long, value_enum, default_value_t = KeyAlgorithm::Ecdsa)]
        algorithm: KeyAlgorithm,
    },

    /// Validate configuration and parameters without emitting anything
    Check,

    /// Generate a default configuration file
    InitConfig {
        /// Output path (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    init_logging(filter);

    match cli.command {
        Commands::Compose {
            output,
            placement_provider,
            floating_ip,
        } => {
            let placement = Placement {
                provider: placement_provider,
                floating_ip,
                ..Default::default()
            };
            compose(&cli.config, output, &placement)
        }
        Commands::Keygen { algorithm } => keygen(algorithm),
        Commands::Check => check(&cli.config),
        Commands::InitConfig { output } => generate_config(output),
    }
}

/// Logs go to stderr; stdout carries manifests and key material.
fn init_logging(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn compose(config_path: &Path, output: Option<PathBuf>, placement: &Placement) -> Result<()> {
    let config = load_config(config_path)?;
    let keys = KeyMaterial::from_config(&config.keys).context("Failed to read key material")?;
    let templates = TemplateDir::new(&config.templates_dir);

    let mut topology = Topology::compose(&config, keys, &templates).context("Failed to compose topology")?;
    topology.place_on(placement);

    let mut manifest = Manifest::new();
    topology.deploy(&mut manifest)?;
    let json = manifest.to_json()?;

    match output {
        Some(path) => {
            std::fs::write(&path, format!("{json}\n"))
                .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
            info!("Manifest written to: {}", path.display());
        }
        None => {
            println!("{json}");
        }
    }

    if let Some(private_key) = topology.take_generated_user_key() {
        warn!("Save this key; the release uploader needs it to reach the relay. It will not be shown again.");
        eprint!("{private_key}");
    }

    Ok(())
}

fn keygen(algorithm: KeyAlgorithm) -> Result<()> {
    let pair = KeyPair::generate(algorithm)?;
    print!("{}", pair.private_key());
    println!("{}", pair.public_key());
    Ok(())
}

fn check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    config
        .parameters
        .require_all(params::REQUIRED)
        .context("Incomplete parameters")?;

    let keys = KeyMaterial::from_config(&config.keys).context("Failed to read key material")?;
    for (name, key) in [("user", &keys.user_key), ("host", &keys.host_key)] {
        match key {
            Some(text) => {
                let pair = KeyPair::parse(text).with_context(|| format!("Invalid {name} key"))?;
                info!("{} key: {}", name, pair.key_type()?);
            }
            None => info!("{} key: generated at compose time", name),
        }
    }

    // Compose into a throwaway manifest so every referenced template is read
    let templates = TemplateDir::new(&config.templates_dir);
    let topology = Topology::compose(&config, keys, &templates).context("Failed to compose topology")?;
    topology.deploy(&mut Manifest::new())?;

    info!("Configuration OK");
    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = config::default_config_template();

    match output {
        Some(path) => {
            std::fs::write(&path, &config)?;
            println!("Configuration written to: {}", path.display());
        }
        None => {
            print!("{}", config);
        }
    }

    Ok(())
}
