//! Component specs and the deployment seam.
//!
//! The container runtime itself is out of scope. Composers produce
//! [`ComponentSpec`] values; anything implementing [`DeploymentTarget`] can
//! consume them. [`Manifest`] is the target used by the CLI: it collects the
//! specs and serializes them to JSON for the runtime to pick up.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Endpoint of a network rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRef {
    /// Anything outside the deployment.
    PublicInternet,
    /// A component in the deployment, by name.
    Component(String),
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRef::PublicInternet => f.write_str("public-internet"),
            ComponentRef::Component(name) => f.write_str(name),
        }
    }
}

/// Directional allow-rule: `from` may open connections to `to` on `port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkRule {
    pub from: ComponentRef,
    pub to: ComponentRef,
    pub port: u16,
}

impl NetworkRule {
    pub fn new(from: ComponentRef, to: ComponentRef, port: u16) -> Self {
        Self { from, to, port }
    }
}

impl fmt::Display for NetworkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.from, self.to, self.port)
    }
}

/// Placement constraint attached to a component before deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,
}

impl Placement {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.size.is_none()
            && self.region.is_none()
            && self.floating_ip.is_none()
    }
}

/// Everything the container runtime needs to start one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Absolute path inside the container -> file content.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<NetworkRule>,
    #[serde(default)]
    pub placements: Vec<Placement>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command,
            env: BTreeMap::new(),
            files: BTreeMap::new(),
            rules: Vec::new(),
            placements: Vec::new(),
        }
    }

    pub fn component_ref(&self) -> ComponentRef {
        ComponentRef::Component(self.name.clone())
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Stage a file. A later call with the same path replaces the content.
    pub fn stage_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        debug!("{}: staging {}", self.name, path);
        self.files.insert(path, content.into());
    }

    /// Allow `client` to connect to this component on `port`.
    pub fn allow_from(&mut self, client: ComponentRef, port: u16) {
        let rule = NetworkRule::new(client, self.component_ref(), port);
        self.push_rule(rule);
    }

    /// Allow this component to connect to `server` on `port`.
    pub fn allow_to(&mut self, server: ComponentRef, port: u16) {
        let rule = NetworkRule::new(self.component_ref(), server, port);
        self.push_rule(rule);
    }

    fn push_rule(&mut self, rule: NetworkRule) {
        if !self.rules.contains(&rule) {
            debug!("{}: allow {}", self.name, rule);
            self.rules.push(rule);
        }
    }
}

/// Consumer of component specs, i.e. the container runtime.
pub trait DeploymentTarget {
    fn deploy_component(&mut self, spec: &ComponentSpec) -> Result<()>;
}

/// Something that can be handed to a [`DeploymentTarget`].
pub trait Deployable {
    fn deploy(&self, target: &mut dyn DeploymentTarget) -> Result<()>;

    fn place_on(&mut self, placement: &Placement);
}

impl Deployable for ComponentSpec {
    fn deploy(&self, target: &mut dyn DeploymentTarget) -> Result<()> {
        target.deploy_component(self)
    }

    fn place_on(&mut self, placement: &Placement) {
        if !placement.is_empty() {
            self.placements.push(placement.clone());
        }
    }
}

/// Serializable collection of deployed components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub components: Vec<ComponentSpec>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    /// All allow-rules across every component.
    pub fn rules(&self) -> impl Iterator<Item = &NetworkRule> {
        self.components.iter().flat_map(|c| c.rules.iter())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl DeploymentTarget for Manifest {
    fn deploy_component(&mut self, spec: &ComponentSpec) -> Result<()> {
        if self.component(&spec.name).is_some() {
            return Err(Error::DuplicateComponent(spec.name.clone()));
        }
        self.components.push(spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ComponentSpec {
        ComponentSpec::new(name, "busybox", vec!["true".to_string()])
    }

    #[test]
    fn test_stage_file_last_write_wins() {
        let mut web = spec("web");
        web.stage_file("/etc/motd", "first");
        web.stage_file("/etc/motd", "second");
        assert_eq!(web.files.len(), 1);
        assert_eq!(web.files["/etc/motd"], "second");
    }

    #[test]
    fn test_rules_are_directional() {
        let mut web = spec("web");
        web.allow_from(ComponentRef::PublicInternet, 80);
        web.allow_to(ComponentRef::Component("db".into()), 5432);
        web.allow_from(ComponentRef::PublicInternet, 80);

        assert_eq!(
            web.rules,
            vec![
                NetworkRule::new(ComponentRef::PublicInternet, web.component_ref(), 80),
                NetworkRule::new(web.component_ref(), ComponentRef::Component("db".into()), 5432),
            ]
        );
        assert_eq!(web.rules[1].to_string(), "web -> db:5432");
    }

    #[test]
    fn test_place_on_skips_empty_placement() {
        let mut web = spec("web");
        web.place_on(&Placement::default());
        assert!(web.placements.is_empty());

        let placement = Placement {
            floating_ip: Some("8.8.8.8".into()),
            ..Default::default()
        };
        web.place_on(&placement);
        assert_eq!(web.placements, vec![placement]);
    }

    #[test]
    fn test_manifest_rejects_duplicate_names() {
        let mut manifest = Manifest::new();
        spec("web").deploy(&mut manifest).unwrap();
        spec("db").deploy(&mut manifest).unwrap();

        match spec("web").deploy(&mut manifest) {
            Err(Error::DuplicateComponent(name)) => assert_eq!(name, "web"),
            other => panic!("expected DuplicateComponent, got {other:?}"),
        }
        assert_eq!(manifest.components.len(), 2);
    }

    #[test]
    fn test_manifest_json_shape() {
        let mut web = spec("web");
        web.set_env("TZ", "UTC");
        web.allow_from(ComponentRef::PublicInternet, 443);

        let mut manifest = Manifest::new();
        web.deploy(&mut manifest).unwrap();

        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        let component = &value["components"][0];
        assert_eq!(component["name"], "web");
        assert_eq!(component["env"]["TZ"], "UTC");
        assert_eq!(component["rules"][0]["from"], "public_internet");
        assert_eq!(component["rules"][0]["to"]["component"], "web");
        assert_eq!(component["rules"][0]["port"], 443);
    }
}
