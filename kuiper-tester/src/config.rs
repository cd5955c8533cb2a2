//! Configuration loading for kuiper-tester.
//!
//! Loads configuration from a TOML file and/or environment variables using
//! figment, so secrets can be injected by CI without touching the file.
//!
//! # Configuration Sources (in order of priority, lowest to highest)
//!
//! 1. Default values (from `#[serde(default)]` attributes)
//! 2. TOML config file (if it exists)
//! 3. Environment variables (prefix: `KUIPER_TESTER_`, nested with `__`)
//!
//! # Environment Variable Naming
//!
//! - `KUIPER_TESTER_PARAMETERS__SLACK_WEBHOOK` → `parameters.slack_webhook`
//! - `KUIPER_TESTER_RELAY__PORT` → `relay.port`
//! - `KUIPER_TESTER_KEYS__USER_KEY_PATH` → `keys.user_key_path`
//!
//! **Note:** `orchestrator.providers` and `orchestrator.outbound_ports` are
//! arrays and should be configured in the TOML file.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::keys::KeyAlgorithm;
use crate::params::Parameters;

const ENV_PREFIX: &str = "KUIPER_TESTER_";

/// Main configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Named secrets and settings substituted into the Jenkins templates.
    #[serde(default)]
    pub parameters: Parameters,

    /// Release relay (SCP + HTTP) settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Jenkins settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Key material import/generation.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Directory holding the template files.
    ///
    /// Relative paths are resolved against the config file's directory.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parameters: Parameters::default(),
            relay: RelayConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            keys: KeysConfig::default(),
            templates_dir: default_templates_dir(),
        }
    }
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

/// Release relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Component name (default: "scp")
    #[serde(default = "default_relay_name")]
    pub name: String,

    /// Container image running sshd, rssh and nginx
    #[serde(default = "default_relay_image")]
    pub image: String,

    /// The only user allowed to connect (default: "releaser")
    #[serde(default = "default_relay_user")]
    pub user: String,

    /// sshd listen port (default: 2222)
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Hostname other components reach the relay at.
    ///
    /// Defaults to `<name>.q`, the runtime's internal DNS name.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Also serve `/home/<user>/releases` over HTTP on port 80.
    #[serde(default = "default_true")]
    pub serve_http: bool,
}

impl RelayConfig {
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| format!("{}.q", self.name))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
            image: default_relay_image(),
            user: default_relay_user(),
            port: default_relay_port(),
            hostname: None,
            serve_http: true,
        }
    }
}

fn default_relay_name() -> String {
    "scp".to_string()
}

fn default_relay_image() -> String {
    "kelda/scp-server".to_string()
}

fn default_relay_user() -> String {
    "releaser".to_string()
}

fn default_relay_port() -> u16 {
    2222
}

fn default_true() -> bool {
    true
}

/// Jenkins configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Component name (default: "jenkins")
    #[serde(default = "default_orchestrator_name")]
    pub name: String,

    #[serde(default = "default_orchestrator_image")]
    pub image: String,

    /// Web UI port opened to the public internet (default: 8080)
    #[serde(default = "default_ui_port")]
    pub ui_port: u16,

    /// Where files are uploaded before the start command copies them.
    ///
    /// The runtime writes staged files as root, so they are copied into
    /// `home_dir` by the Jenkins user at container start.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// `JENKINS_HOME` inside the container.
    #[serde(default = "default_home_dir")]
    pub home_dir: String,

    /// zoneinfo name exported as `TZ`.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Ports the test jobs open to the public internet.
    #[serde(default = "default_outbound_ports")]
    pub outbound_ports: Vec<u16>,

    /// One integration-tester job is generated per provider.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderTarget>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: default_orchestrator_name(),
            image: default_orchestrator_image(),
            ui_port: default_ui_port(),
            staging_dir: default_staging_dir(),
            home_dir: default_home_dir(),
            timezone: default_timezone(),
            outbound_ports: default_outbound_ports(),
            providers: default_providers(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject providers that would map onto the same job.
    ///
    /// Job names only carry the provider slug, so two sizes of one provider
    /// would overwrite each other's job.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for target in &self.providers {
            if !seen.insert(target.job_name()) {
                return Err(Error::DuplicateProvider(target.job_name()));
            }
        }
        Ok(())
    }
}

fn default_orchestrator_name() -> String {
    "jenkins".to_string()
}

fn default_orchestrator_image() -> String {
    "kelda/tester".to_string()
}

fn default_ui_port() -> u16 {
    8080
}

fn default_staging_dir() -> String {
    "/tmp/files/".to_string()
}

fn default_home_dir() -> String {
    "/var/jenkins_home".to_string()
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_outbound_ports() -> Vec<u16> {
    vec![
        22,   // `kelda ssh`
        80,   // network tests
        443,  // network tests
        8000, // network tests
        9000, // daemon API
        9200, // elasticsearch test
        9418, // git, for `npm install`
        9999, // minion communication
    ]
}

fn default_providers() -> Vec<ProviderTarget> {
    vec![
        ProviderTarget::new("Amazon", "m3.medium"),
        ProviderTarget::new("Google", "n1-standard-1"),
        ProviderTarget::new("DigitalOcean", "2gb"),
    ]
}

/// Cloud provider exercised by an integration-tester job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderTarget {
    /// Provider name as the tester expects it, e.g. "Amazon"
    pub provider: String,

    /// Machine size booted for the test
    pub size: String,
}

impl ProviderTarget {
    pub fn new(provider: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            size: size.into(),
        }
    }

    /// Lowercase provider name, used in job names and namespaces.
    pub fn slug(&self) -> String {
        self.provider.to_lowercase()
    }

    pub fn job_name(&self) -> String {
        format!("integration-tester-{}", self.slug())
    }
}

/// Key material configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KeysConfig {
    /// Algorithm for generated keys (default: "ecdsa")
    #[serde(default)]
    pub algorithm: KeyAlgorithm,

    /// Existing private key the release uploader authenticates with.
    ///
    /// When unset a key is generated and printed once so it can be handed to
    /// the uploader.
    #[serde(default)]
    pub user_key_path: Option<PathBuf>,

    /// Existing relay host key. Generated when unset.
    #[serde(default)]
    pub host_key_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Configuration sources are merged in order (later sources override earlier):
    /// 1. TOML config file (if it exists)
    /// 2. Environment variables (prefix: `KUIPER_TESTER_`, nested with `__`)
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::new();

        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract()?;
        config.orchestrator.validate()?;
        config.resolve_paths(path.parent().unwrap_or_else(|| Path::new("")));
        Ok(config)
    }

    /// Make relative paths relative to `base` rather than the working directory.
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.templates_dir);
        if let Some(p) = self.keys.user_key_path.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.keys.host_key_path.as_mut() {
            resolve(p);
        }
    }

    /// Get the default config file path
    /// - macOS: ~/Library/Application Support/kuiper-tester/config.toml
    /// - Linux: ~/.config/kuiper-tester/config.toml
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kuiper-tester")
            .join("config.toml")
    }
}

/// Create a default configuration template
pub fn default_config_template() -> String {
    r##"# kuiper-tester configuration
#
# Every value can be overridden from the environment, e.g.
#   KUIPER_TESTER_PARAMETERS__SLACK_WEBHOOK=https://hooks.slack.com/services/...

templates_dir = "templates"

# =============================================================================
# Parameters
# =============================================================================
#
# All keys below are required except `password_hash` and `jenkins_url`.

[parameters]
aws_access_key = "accessKey"
aws_secret_access_key = "secret"
aws_s3_access_key = "s3AccessKey"
aws_s3_secret_access_key = "s3Secret"
digital_ocean_key = "key"
gce_project_id = "projectID"
gce_private_key = "privateKey"
gce_client_email = "email"
testing_namespace_prefix = "integration-tester"
slack_channel = "#testing"
slack_webhook = "https://hooks.slack.com/services/..."
# password_hash = "#jbcrypt:$2a$10$..."
# jenkins_url = "http://8.8.8.8:8080"

[relay]
name = "scp"
user = "releaser"
port = 2222
serve_http = true
# hostname = "scp.q"

[orchestrator]
name = "jenkins"
ui_port = 8080
timezone = "America/Los_Angeles"
outbound_ports = [22, 80, 443, 8000, 9000, 9200, 9418, 9999]

[[orchestrator.providers]]
provider = "Amazon"
size = "m3.medium"

[[orchestrator.providers]]
provider = "Google"
size = "n1-standard-1"

[[orchestrator.providers]]
provider = "DigitalOcean"
size = "2gb"

[keys]
algorithm = "ecdsa"
# Reuse existing keys instead of generating new ones on every run.
# user_key_path = "releaser_key"
# host_key_path = "host_key"
"##
    .to_string()
}
