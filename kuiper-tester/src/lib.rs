//! Kuiper tester topology composer
//!
//! Composes the release relay (SCP + HTTP) and the Jenkins instance that
//! runs the integration tests into component specs for a container runtime.
//! The binary entry point is in main.rs.

pub mod config;
pub mod deploy;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod params;
pub mod relay;
pub mod template;
pub mod topology;

pub use config::Config;
pub use deploy::{ComponentRef, ComponentSpec, Deployable, DeploymentTarget, Manifest, NetworkRule, Placement};
pub use error::{Error, Result};
pub use keys::{KeyAlgorithm, KeyPair, KeyType};
pub use orchestrator::{BuildOrchestrator, StagedFile};
pub use params::Parameters;
pub use relay::{CredentialRelay, TransferOptions};
pub use template::{TemplateDir, TemplateSource, render};
pub use topology::{KeyMaterial, Topology};
