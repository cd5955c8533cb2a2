//! Release relay: an SCP endpoint that CI uploads releases to.
//!
//! The relay runs sshd restricted to a single user (via rssh) and, when
//! enabled, nginx serving the uploaded releases read-only over HTTP.

use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::deploy::{ComponentRef, ComponentSpec, Deployable, DeploymentTarget, Placement};
use crate::error::Result;
use crate::keys::KeyPair;

/// Port nginx listens on.
pub const HTTP_PORT: u16 = 80;

/// Optional flags for [`CredentialRelay::transfer_command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions<'a> {
    /// Private key passed to scp with `-i`.
    pub identity_file: Option<&'a str>,
    /// known_hosts file passed with `-o UserKnownHostsFile=`.
    pub known_hosts_file: Option<&'a str>,
}

/// Composed relay component.
#[derive(Debug, Clone)]
pub struct CredentialRelay {
    spec: ComponentSpec,
    user: String,
    port: u16,
    hostname: String,
    serve_http: bool,
    user_keys: KeyPair,
    host_keys: KeyPair,
}

impl CredentialRelay {
    /// Build the relay spec.
    ///
    /// `user_keys` authenticates the single allowed client; `host_keys`
    /// identifies the relay to its clients. Fails with
    /// [`UnsupportedKeyType`](crate::Error::UnsupportedKeyType) if the host
    /// key has no sshd file name.
    pub fn new(config: &RelayConfig, user_keys: KeyPair, host_keys: KeyPair) -> Result<Self> {
        let host_key_path = host_keys.key_type()?.host_key_path();
        let user = config.user.as_str();
        let home = format!("/home/{user}");

        // The runtime can't set file modes, and sshd refuses a host key
        // that is readable by others.
        let mut steps = vec![
            format!("chmod 0600 {host_key_path}"),
            format!("useradd --shell /usr/bin/rssh {user}"),
            format!("mkdir -p {home}/releases"),
            format!("chown -R {user} {home}"),
        ];
        if config.serve_http {
            steps.push("nginx".to_string());
        }
        steps.push(format!("/usr/sbin/sshd -p {} -D -e", config.port));

        let command = vec!["bash".to_string(), "-c".to_string(), steps.join(" && ")];
        let mut spec = ComponentSpec::new(&config.name, &config.image, command);

        spec.stage_file(format!("{home}/.ssh/authorized_keys"), user_keys.public_key());
        spec.stage_file(host_key_path.clone(), host_keys.private_key());
        spec.stage_file(format!("{host_key_path}.pub"), host_keys.public_key());
        if config.serve_http {
            spec.stage_file("/etc/nginx/sites-enabled/default", nginx_site(&home));
        }

        info!(
            "Composed relay {} ({}@{}:{}, http={})",
            config.name,
            user,
            config.hostname(),
            config.port,
            config.serve_http
        );

        Ok(Self {
            spec,
            user: config.user.clone(),
            port: config.port,
            hostname: config.hostname(),
            serve_http: config.serve_http,
            user_keys,
            host_keys,
        })
    }

    /// Command line that copies `remote_path` on the relay to `local_path`.
    ///
    /// The output is embedded verbatim into generated job configuration and
    /// is identical for identical inputs.
    pub fn transfer_command(&self, remote_path: &str, local_path: &str, options: &TransferOptions<'_>) -> String {
        let port = self.port.to_string();
        let mut args = vec!["scp", "-P", port.as_str()];

        if let Some(identity_file) = options.identity_file.filter(|f| !f.is_empty()) {
            args.extend(["-i", identity_file]);
        }

        let known_hosts;
        if let Some(file) = options.known_hosts_file.filter(|f| !f.is_empty()) {
            known_hosts = format!("UserKnownHostsFile={file}");
            args.extend(["-o", known_hosts.as_str()]);
        }

        let remote = format!("{}@{}:{}", self.user, self.hostname, remote_path);
        args.extend([remote.as_str(), local_path]);

        args.join(" ")
    }

    /// `known_hosts` line that pins this relay's host key.
    pub fn known_hosts_entry(&self) -> String {
        if self.port == 22 {
            format!("{} {}", self.hostname, self.host_keys.public_key())
        } else {
            format!("[{}]:{} {}", self.hostname, self.port, self.host_keys.public_key())
        }
    }

    /// Allow `client` to connect to sshd.
    pub fn allow_transfer_from(&mut self, client: ComponentRef) {
        debug!("Allowing {} to reach relay on {}", client, self.port);
        self.spec.allow_from(client, self.port);
    }

    /// Allow `client` to fetch releases over HTTP.
    pub fn allow_http_from(&mut self, client: ComponentRef) {
        debug!("Allowing {} to reach relay on {}", client, HTTP_PORT);
        self.spec.allow_from(client, HTTP_PORT);
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    pub fn component_ref(&self) -> ComponentRef {
        self.spec.component_ref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn serves_http(&self) -> bool {
        self.serve_http
    }

    pub fn user_keys(&self) -> &KeyPair {
        &self.user_keys
    }

    pub fn host_keys(&self) -> &KeyPair {
        &self.host_keys
    }
}

impl Deployable for CredentialRelay {
    fn deploy(&self, target: &mut dyn DeploymentTarget) -> Result<()> {
        self.spec.deploy(target)
    }

    fn place_on(&mut self, placement: &Placement) {
        self.spec.place_on(placement);
    }
}

fn nginx_site(home: &str) -> String {
    format!(
        "server {{
    listen {HTTP_PORT} default_server;
    root {home}/releases;
    location / {{
        autoindex on;
    }}
}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::keys::fixtures::*;
    use ssh_key::Algorithm;

    fn relay_config() -> RelayConfig {
        RelayConfig {
            name: "relay".to_string(),
            hostname: Some("relay.example".to_string()),
            ..Default::default()
        }
    }

    fn compose_relay(config: &RelayConfig) -> CredentialRelay {
        CredentialRelay::new(
            config,
            KeyPair::parse(ECDSA_PRIVATE).unwrap(),
            KeyPair::parse(ED25519_PRIVATE).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_command_with_options() {
        let relay = compose_relay(&relay_config());
        let command = relay.transfer_command(
            "foo.tar.gz",
            "out.tar.gz",
            &TransferOptions {
                identity_file: Some("k"),
                known_hosts_file: Some("kh"),
            },
        );
        assert_eq!(
            command,
            "scp -P 2222 -i k -o UserKnownHostsFile=kh releaser@relay.example:foo.tar.gz out.tar.gz"
        );
    }

    #[test]
    fn test_transfer_command_without_options() {
        let relay = compose_relay(&relay_config());
        let command = relay.transfer_command("foo.tar.gz", "out.tar.gz", &TransferOptions::default());
        assert_eq!(command, "scp -P 2222 releaser@relay.example:foo.tar.gz out.tar.gz");

        // Empty strings behave like absent flags
        let command = relay.transfer_command(
            "foo.tar.gz",
            "out.tar.gz",
            &TransferOptions {
                identity_file: Some(""),
                known_hosts_file: Some("kh"),
            },
        );
        assert_eq!(
            command,
            "scp -P 2222 -o UserKnownHostsFile=kh releaser@relay.example:foo.tar.gz out.tar.gz"
        );
    }

    #[test]
    fn test_default_hostname() {
        let relay = compose_relay(&RelayConfig::default());
        assert_eq!(relay.hostname(), "scp.q");
        assert_eq!(
            relay.transfer_command("a", "b", &TransferOptions::default()),
            "scp -P 2222 releaser@scp.q:a b"
        );
    }

    #[test]
    fn test_staged_files() {
        let relay = compose_relay(&relay_config());
        let files = &relay.spec().files;

        assert_eq!(files["/home/releaser/.ssh/authorized_keys"], ECDSA_PUBLIC);
        assert_eq!(files["/etc/ssh/ssh_host_ed25519_key"], ED25519_PRIVATE);
        assert_eq!(files["/etc/ssh/ssh_host_ed25519_key.pub"], ED25519_PUBLIC);
        assert!(files["/etc/nginx/sites-enabled/default"].contains("root /home/releaser/releases;"));
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn test_command_restricts_host_key_first() {
        let relay = compose_relay(&relay_config());
        let command = &relay.spec().command;
        assert_eq!(command[..2], ["bash".to_string(), "-c".to_string()]);
        assert!(command[2].starts_with("chmod 0600 /etc/ssh/ssh_host_ed25519_key && "));
        assert!(command[2].contains("useradd --shell /usr/bin/rssh releaser"));
        assert!(command[2].contains(" && nginx && "));
        assert!(command[2].ends_with("/usr/sbin/sshd -p 2222 -D -e"));
    }

    #[test]
    fn test_http_disabled() {
        let config = RelayConfig {
            serve_http: false,
            ..relay_config()
        };
        let relay = compose_relay(&config);
        assert!(!relay.serves_http());
        assert!(!relay.spec().files.contains_key("/etc/nginx/sites-enabled/default"));
        assert!(!relay.spec().command[2].contains("nginx"));
    }

    #[test]
    fn test_known_hosts_entry() {
        let relay = compose_relay(&relay_config());
        assert_eq!(relay.known_hosts_entry(), format!("[relay.example]:2222 {ED25519_PUBLIC}"));

        let config = RelayConfig {
            port: 22,
            ..relay_config()
        };
        assert_eq!(compose_relay(&config).known_hosts_entry(), format!("relay.example {ED25519_PUBLIC}"));
    }

    #[test]
    fn test_allow_rules() {
        let mut relay = compose_relay(&relay_config());
        let jenkins = ComponentRef::Component("jenkins".to_string());
        relay.allow_transfer_from(jenkins.clone());
        relay.allow_http_from(ComponentRef::PublicInternet);

        let rules = &relay.spec().rules;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].from, jenkins);
        assert_eq!(rules[0].to, relay.component_ref());
        assert_eq!(rules[0].port, 2222);
        assert_eq!(rules[1].from, ComponentRef::PublicInternet);
        assert_eq!(rules[1].port, HTTP_PORT);
    }

    #[test]
    fn test_unsupported_host_key_type() {
        let host_keys = KeyPair::from_parts("sk-ssh-ed25519@openssh.com AAAA", "unused", Algorithm::SkEd25519);
        let result = CredentialRelay::new(&relay_config(), KeyPair::parse(ECDSA_PRIVATE).unwrap(), host_keys);
        assert!(matches!(result, Err(Error::UnsupportedKeyType(_))));
    }
}
