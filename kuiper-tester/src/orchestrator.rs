//! Jenkins build orchestrator.
//!
//! Jenkins is configured entirely through files in `JENKINS_HOME`. The
//! composer renders those files, stages them into the container, and
//! declares the environment and network access the test jobs need.
//!
//! The runtime uploads staged files as root, but Jenkins runs as its own
//! unprivileged user and needs to own its home directory. Files are
//! therefore staged under `staging_dir` and copied into `home_dir` by the
//! start command, which runs as the Jenkins user.

use tracing::{debug, info};

use crate::config::{OrchestratorConfig, ProviderTarget};
use crate::deploy::{ComponentRef, ComponentSpec, Deployable, DeploymentTarget, Placement};
use crate::error::Result;
use crate::params::{self, Parameters};
use crate::relay::{CredentialRelay, TransferOptions};
use crate::template::TemplateSource;

/// Release tarball on the relay. `${RELEASE_VERSION}` is expanded by Jenkins.
pub const RELEASE_REMOTE_PATH: &str = "releases/${RELEASE_VERSION}.tar.gz";

/// Where jobs download the release to, relative to their workspace.
pub const RELEASE_LOCAL_PATH: &str = "release.tar.gz";

/// Directory under `JENKINS_HOME` holding the relay credentials.
pub const RELAY_CREDENTIALS_DIR: &str = ".scp";

/// Job that fetches a release and triggers every provider job.
pub const ALL_PROVIDERS_JOB: &str = "integration-tester";

pub const CHECK_DEPENDENCIES_JOB: &str = "check-dependencies";

/// Documents copied into `JENKINS_HOME` verbatim: (destination, template).
const STATIC_DOCUMENTS: &[(&str, &str)] = &[
    ("config.xml", "jenkins/root.xml"),
    ("scriptApproval.xml", "jenkins/scriptApproval.xml"),
    ("org.jenkinsci.plugins.golang.GolangBuildWrapper.xml", "jenkins/go.xml"),
    ("jenkins.plugins.nodejs.tools.NodeJSInstallation.xml", "jenkins/node.xml"),
];

/// A file that must exist at `path`, relative to `JENKINS_HOME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub content: String,
}

impl StagedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Composed Jenkins component.
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    spec: ComponentSpec,
    staged: Vec<StagedFile>,
}

impl BuildOrchestrator {
    /// Validate `params` and compose the Jenkins spec.
    ///
    /// Jobs fetch releases from `relay` using its user key, pinned to its
    /// host key. Any missing parameter or template aborts composition.
    pub fn new(
        params: &Parameters,
        config: &OrchestratorConfig,
        relay: &CredentialRelay,
        templates: &dyn TemplateSource,
    ) -> Result<Self> {
        params.require_all(params::REQUIRED)?;
        config.validate()?;

        let home = home_dir(config);
        let staging_dir = format!("{}/", config.staging_dir.trim_end_matches('/'));
        let identity_file = home_path(config, &identity_path(relay)?);

        let staged = stage_bundle(params, config, relay, templates)?;

        let command = vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!(
                "cp -r {staging_dir}. {home};\
                 chmod 0600 {identity_file};\
                 /bin/tini -s -- /usr/local/bin/jenkins.sh"
            ),
        ];
        let mut spec = ComponentSpec::new(&config.name, &config.image, command);

        for file in &staged {
            spec.stage_file(format!("{staging_dir}{}", file.path), file.content.as_str());
        }

        spec.set_env("AWS_ACCESS_KEY", params.require(params::AWS_ACCESS_KEY)?);
        spec.set_env("AWS_SECRET_ACCESS_KEY", params.require(params::AWS_SECRET_ACCESS_KEY)?);
        // Release uploads use separate, bucket-scoped credentials
        spec.set_env("AWS_S3_ACCESS_KEY", params.require(params::AWS_S3_ACCESS_KEY)?);
        spec.set_env(
            "AWS_S3_SECRET_ACCESS_KEY",
            params.require(params::AWS_S3_SECRET_ACCESS_KEY)?,
        );
        spec.set_env(
            "TESTING_NAMESPACE_PREFIX",
            params.require(params::TESTING_NAMESPACE_PREFIX)?,
        );
        spec.set_env("SLACK_WEBHOOK", params.require(params::SLACK_WEBHOOK)?);
        spec.set_env("TZ", format!("/usr/share/zoneinfo/{}", config.timezone));

        // Web UI
        spec.allow_from(ComponentRef::PublicInternet, config.ui_port);

        // The tests talk to the machines they boot on these ports
        for port in &config.outbound_ports {
            spec.allow_to(ComponentRef::PublicInternet, *port);
        }

        info!(
            "Composed orchestrator {} ({} staged files, {} provider jobs)",
            config.name,
            staged.len(),
            config.providers.len()
        );

        Ok(Self { spec, staged })
    }

    /// Staged files in the order they were produced.
    pub fn staged_files(&self) -> &[StagedFile] {
        &self.staged
    }

    /// Look up a staged file by its path relative to `JENKINS_HOME`.
    ///
    /// Later files win over earlier ones with the same path.
    pub fn staged_file(&self, path: &str) -> Option<&StagedFile> {
        self.staged.iter().rev().find(|f| f.path == path)
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    pub fn component_ref(&self) -> ComponentRef {
        self.spec.component_ref()
    }
}

impl Deployable for BuildOrchestrator {
    fn deploy(&self, target: &mut dyn DeploymentTarget) -> Result<()> {
        self.spec.deploy(target)
    }

    fn place_on(&mut self, placement: &Placement) {
        self.spec.place_on(placement);
    }
}

/// Relay identity file, relative to `JENKINS_HOME`, e.g. `.scp/id_ecdsa`.
fn identity_path(relay: &CredentialRelay) -> Result<String> {
    let key_type = relay.user_keys().key_type()?;
    Ok(format!("{RELAY_CREDENTIALS_DIR}/{}", key_type.identity_file_name()))
}

fn known_hosts_path() -> String {
    format!("{RELAY_CREDENTIALS_DIR}/known_hosts")
}

fn stage_bundle(
    params: &Parameters,
    config: &OrchestratorConfig,
    relay: &CredentialRelay,
    templates: &dyn TemplateSource,
) -> Result<Vec<StagedFile>> {
    let slack_channel = params.require(params::SLACK_CHANNEL)?;
    let slack_webhook = params.require(params::SLACK_WEBHOOK)?;
    let namespace_prefix = params.require(params::TESTING_NAMESPACE_PREFIX)?;

    let mut files = Vec::new();

    // Provider credentials
    files.push(StagedFile::new(
        ".digitalocean/key",
        params.require(params::DIGITAL_OCEAN_KEY)?,
    ));
    files.push(StagedFile::new(
        ".gce/kelda.json",
        templates.render(
            "gce.json.tmpl",
            &[
                (params::GCE_PROJECT_ID, params.require(params::GCE_PROJECT_ID)?),
                (params::GCE_PRIVATE_KEY, params.require(params::GCE_PRIVATE_KEY)?),
                (params::GCE_CLIENT_EMAIL, params.require(params::GCE_CLIENT_EMAIL)?),
            ],
        )?,
    ));

    for (path, template) in STATIC_DOCUMENTS {
        files.push(StagedFile::new(*path, templates.read(template)?));
    }

    // Jobs authenticate to the relay with the user key and pin its host key
    let identity_file = home_path(config, &identity_path(relay)?);
    let known_hosts_file = home_path(config, &known_hosts_path());
    let copy_command = relay.transfer_command(
        RELEASE_REMOTE_PATH,
        RELEASE_LOCAL_PATH,
        &TransferOptions {
            identity_file: Some(&identity_file),
            known_hosts_file: Some(&known_hosts_file),
        },
    );

    for target in &config.providers {
        let namespace = format!("{namespace_prefix}-{}", target.slug());
        let job = templates.render(
            "jenkins/integration-tester.xml",
            &[
                ("provider", target.provider.as_str()),
                ("size", target.size.as_str()),
                ("testing_namespace", namespace.as_str()),
                ("copy_command", copy_command.as_str()),
                (params::SLACK_CHANNEL, slack_channel),
                (params::SLACK_WEBHOOK, slack_webhook),
            ],
        )?;
        debug!("Rendered {} for {} ({})", target.job_name(), target.provider, target.size);
        files.push(StagedFile::new(job_config_path(&target.job_name()), job));
    }

    let downstream_jobs = config
        .providers
        .iter()
        .map(ProviderTarget::job_name)
        .collect::<Vec<_>>()
        .join(",");
    files.push(StagedFile::new(
        job_config_path(ALL_PROVIDERS_JOB),
        templates.render(
            "jenkins/integration-tester-all.xml",
            &[
                ("copy_command", copy_command.as_str()),
                ("downstream_jobs", downstream_jobs.as_str()),
                (params::SLACK_CHANNEL, slack_channel),
                (params::SLACK_WEBHOOK, slack_webhook),
            ],
        )?,
    ));

    files.push(StagedFile::new(identity_path(relay)?, relay.user_keys().private_key()));
    files.push(StagedFile::new(known_hosts_path(), format!("{}\n", relay.known_hosts_entry())));

    files.push(StagedFile::new(
        job_config_path(CHECK_DEPENDENCIES_JOB),
        templates.render(
            "jenkins/check-dependencies.xml",
            &[
                (params::SLACK_CHANNEL, slack_channel),
                (params::SLACK_WEBHOOK, slack_webhook),
            ],
        )?,
    ));

    if let Some(password_hash) = params.get(params::PASSWORD_HASH) {
        files.push(StagedFile::new(
            "users/admin/config.xml",
            templates.render("jenkins/admin.xml", &[(params::PASSWORD_HASH, password_hash)])?,
        ));
    }

    if let Some(jenkins_url) = params.get(params::JENKINS_URL) {
        files.push(StagedFile::new(
            "jenkins.model.JenkinsLocationConfiguration.xml",
            templates.render("jenkins/location.xml", &[(params::JENKINS_URL, jenkins_url)])?,
        ));
    }

    Ok(files)
}

/// `home_dir` without a trailing slash, except for the root itself.
fn home_dir(config: &OrchestratorConfig) -> &str {
    match config.home_dir.trim_end_matches('/') {
        "" => "/",
        home => home,
    }
}

/// Absolute path of `relative` inside `JENKINS_HOME`.
fn home_path(config: &OrchestratorConfig, relative: &str) -> String {
    format!("{}/{relative}", config.home_dir.trim_end_matches('/'))
}

fn job_config_path(job: &str) -> String {
    format!("jobs/{job}/config.xml")
}
