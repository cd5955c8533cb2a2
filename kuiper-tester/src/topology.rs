//! Tester topology: the release relay plus the Jenkins orchestrator.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{Config, KeysConfig};
use crate::deploy::{ComponentRef, Deployable, DeploymentTarget, NetworkRule, Placement};
use crate::error::Result;
use crate::keys::{KeyAlgorithm, KeyPair};
use crate::orchestrator::BuildOrchestrator;
use crate::params;
use crate::relay::CredentialRelay;
use crate::template::TemplateSource;

/// Existing OpenSSH private keys to import. `None` means generate.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub user_key: Option<String>,
    pub host_key: Option<String>,
}

impl KeyMaterial {
    /// Read the key files named in `config`. Unset paths stay `None`.
    pub fn from_config(config: &KeysConfig) -> Result<Self> {
        Ok(Self {
            user_key: read_key(config.user_key_path.as_deref())?,
            host_key: read_key(config.host_key_path.as_deref())?,
        })
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("user_key", &self.user_key.as_ref().map(|_| "<redacted>"))
            .field("host_key", &self.host_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn read_key(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            debug!("Reading key from {}", path.display());
            Ok(Some(std::fs::read_to_string(path)?))
        }
        None => Ok(None),
    }
}

/// Composed topology, ready to deploy.
#[derive(Debug)]
pub struct Topology {
    relay: CredentialRelay,
    orchestrator: BuildOrchestrator,
    generated_user_key: Option<String>,
}

impl Topology {
    /// Compose both components from `config`.
    ///
    /// Parameters are validated before any key is generated or template is
    /// read, so a missing parameter leaves nothing behind.
    pub fn compose(config: &Config, keys: KeyMaterial, templates: &dyn TemplateSource) -> Result<Self> {
        config.parameters.require_all(params::REQUIRED)?;

        let algorithm = config.keys.algorithm;
        let (user_keys, generated_user_key) = match keys.user_key.as_deref() {
            Some(text) => (KeyPair::parse(text)?, None),
            None => {
                let pair = KeyPair::generate(algorithm)?;
                warn!("No user key configured, generated a new {:?} key for the relay", algorithm);
                let private_key = pair.private_key().to_string();
                (pair, Some(private_key))
            }
        };
        let host_keys = import_or_generate(keys.host_key.as_deref(), algorithm)?;

        let mut relay = CredentialRelay::new(&config.relay, user_keys, host_keys)?;
        let orchestrator = BuildOrchestrator::new(&config.parameters, &config.orchestrator, &relay, templates)?;

        relay.allow_transfer_from(orchestrator.component_ref());
        // Releases are uploaded from outside the deployment
        relay.allow_transfer_from(ComponentRef::PublicInternet);
        if relay.serves_http() {
            relay.allow_http_from(ComponentRef::PublicInternet);
        }

        info!(
            "Composed topology: {} and {}",
            relay.spec().name,
            orchestrator.spec().name
        );

        Ok(Self {
            relay,
            orchestrator,
            generated_user_key,
        })
    }

    pub fn relay(&self) -> &CredentialRelay {
        &self.relay
    }

    pub fn orchestrator(&self) -> &BuildOrchestrator {
        &self.orchestrator
    }

    /// Every allow-rule declared by either component.
    pub fn network_rules(&self) -> Vec<&NetworkRule> {
        self.relay
            .spec()
            .rules
            .iter()
            .chain(self.orchestrator.spec().rules.iter())
            .collect()
    }

    /// The user private key, if it was generated during composition.
    ///
    /// Returns it only once. The key is not recoverable afterwards, and the
    /// release uploader needs it to authenticate.
    pub fn take_generated_user_key(&mut self) -> Option<String> {
        self.generated_user_key.take()
    }

    fn parts(&self) -> [&dyn Deployable; 2] {
        [&self.relay, &self.orchestrator]
    }
}

impl Deployable for Topology {
    fn deploy(&self, target: &mut dyn DeploymentTarget) -> Result<()> {
        for part in self.parts() {
            part.deploy(target)?;
        }
        Ok(())
    }

    fn place_on(&mut self, placement: &Placement) {
        self.relay.place_on(placement);
        self.orchestrator.place_on(placement);
    }
}

fn import_or_generate(private_key: Option<&str>, algorithm: KeyAlgorithm) -> Result<KeyPair> {
    match private_key {
        Some(text) => KeyPair::parse(text),
        None => KeyPair::generate(algorithm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::deploy::Manifest;
    use crate::keys::fixtures::*;
    use std::collections::BTreeMap;

    fn templates() -> BTreeMap<String, String> {
        [
            "gce.json.tmpl",
            "jenkins/root.xml",
            "jenkins/scriptApproval.xml",
            "jenkins/go.xml",
            "jenkins/node.xml",
            "jenkins/integration-tester.xml",
            "jenkins/integration-tester-all.xml",
            "jenkins/check-dependencies.xml",
            "jenkins/admin.xml",
            "jenkins/location.xml",
        ]
        .into_iter()
        .map(|name| (name.to_string(), format!("<{name}/>")))
        .collect()
    }

    fn config() -> Config {
        let mut config = Config::default();
        for key in params::REQUIRED {
            config.parameters.insert(*key, format!("{key}-value"));
        }
        config
    }

    fn fixed_keys() -> KeyMaterial {
        KeyMaterial {
            user_key: Some(ECDSA_PRIVATE.to_string()),
            host_key: Some(ED25519_PRIVATE.to_string()),
        }
    }

    #[test]
    fn test_relay_rules() {
        let topology = Topology::compose(&config(), fixed_keys(), &templates()).unwrap();
        let relay = topology.relay().component_ref();
        let jenkins = topology.orchestrator().component_ref();

        let rules = &topology.relay().spec().rules;
        assert_eq!(
            *rules,
            vec![
                NetworkRule::new(jenkins, relay.clone(), 2222),
                NetworkRule::new(ComponentRef::PublicInternet, relay.clone(), 2222),
                NetworkRule::new(ComponentRef::PublicInternet, relay, 80),
            ]
        );

        // 3 relay rules, 1 inbound + 8 outbound for Jenkins
        assert_eq!(topology.network_rules().len(), 12);
    }

    #[test]
    fn test_no_http_rule_when_disabled() {
        let mut config = config();
        config.relay.serve_http = false;

        let topology = Topology::compose(&config, fixed_keys(), &templates()).unwrap();
        assert!(topology.relay().spec().rules.iter().all(|r| r.port != 80));
    }

    #[test]
    fn test_missing_parameter_before_keys() {
        let mut config = config();
        config.parameters.remove(params::GCE_CLIENT_EMAIL);

        // Malformed keys would fail too; the parameter check must come first
        let keys = KeyMaterial {
            user_key: Some("garbage".to_string()),
            host_key: None,
        };
        match Topology::compose(&config, keys, &templates()) {
            Err(Error::MissingParameter { key }) => assert_eq!(key, params::GCE_CLIENT_EMAIL),
            other => panic!("expected MissingParameter, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_user_key() {
        let keys = KeyMaterial {
            user_key: Some("not a key".to_string()),
            host_key: Some(ED25519_PRIVATE.to_string()),
        };
        assert!(matches!(
            Topology::compose(&config(), keys, &templates()),
            Err(Error::MalformedKey(_))
        ));
    }

    #[test]
    fn test_generated_user_key_disclosed_once() {
        let keys = KeyMaterial {
            user_key: None,
            host_key: Some(ED25519_PRIVATE.to_string()),
        };
        let mut topology = Topology::compose(&config(), keys, &templates()).unwrap();

        let key = topology.take_generated_user_key().expect("generated key");
        assert_eq!(key, topology.relay().user_keys().private_key());
        assert!(topology.take_generated_user_key().is_none());
    }

    #[test]
    fn test_imported_user_key_not_disclosed() {
        let mut topology = Topology::compose(&config(), fixed_keys(), &templates()).unwrap();
        assert!(topology.take_generated_user_key().is_none());
    }

    #[test]
    fn test_host_key_independent_of_user_key() {
        // Imported user key, generated host key
        let keys = KeyMaterial {
            user_key: Some(ECDSA_PRIVATE.to_string()),
            host_key: None,
        };
        let topology = Topology::compose(&config(), keys, &templates()).unwrap();
        assert_eq!(topology.relay().user_keys().public_key(), ECDSA_PUBLIC);
        assert_ne!(topology.relay().host_keys().public_key(), ECDSA_PUBLIC);
    }

    #[test]
    fn test_deploy_and_place() {
        let mut topology = Topology::compose(&config(), fixed_keys(), &templates()).unwrap();
        topology.place_on(&Placement {
            provider: Some("Amazon".to_string()),
            floating_ip: Some("8.8.8.8".to_string()),
            ..Default::default()
        });

        let mut manifest = Manifest::new();
        topology.deploy(&mut manifest).unwrap();

        assert_eq!(manifest.components.len(), 2);
        for name in ["scp", "jenkins"] {
            let component = manifest.component(name).unwrap();
            assert_eq!(component.placements.len(), 1);
            assert_eq!(component.placements[0].floating_ip.as_deref(), Some("8.8.8.8"));
        }
        assert_eq!(manifest.rules().count(), 12);

        // A second deploy into the same target collides on names
        assert!(matches!(
            topology.deploy(&mut manifest),
            Err(Error::DuplicateComponent(_))
        ));
    }

    #[test]
    fn test_key_material_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let user_key_path = dir.path().join("releaser_key");
        std::fs::write(&user_key_path, ECDSA_PRIVATE).unwrap();

        let keys = KeyMaterial::from_config(&KeysConfig {
            user_key_path: Some(user_key_path),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(keys.user_key.as_deref(), Some(ECDSA_PRIVATE));
        assert!(keys.host_key.is_none());

        let missing = KeyMaterial::from_config(&KeysConfig {
            host_key_path: Some(dir.path().join("absent")),
            ..Default::default()
        });
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
