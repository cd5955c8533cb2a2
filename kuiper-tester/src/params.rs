//! Named parameters supplied by the operator.
//!
//! Parameters are a flat string map. The keys double as template markers, so
//! `slack_channel` is substituted wherever a template contains
//! `{{slack_channel}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const AWS_ACCESS_KEY: &str = "aws_access_key";
pub const AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const AWS_S3_ACCESS_KEY: &str = "aws_s3_access_key";
pub const AWS_S3_SECRET_ACCESS_KEY: &str = "aws_s3_secret_access_key";
pub const DIGITAL_OCEAN_KEY: &str = "digital_ocean_key";
pub const GCE_PROJECT_ID: &str = "gce_project_id";
pub const GCE_PRIVATE_KEY: &str = "gce_private_key";
pub const GCE_CLIENT_EMAIL: &str = "gce_client_email";
pub const TESTING_NAMESPACE_PREFIX: &str = "testing_namespace_prefix";
pub const SLACK_CHANNEL: &str = "slack_channel";
pub const SLACK_WEBHOOK: &str = "slack_webhook";

/// Bcrypt hash for the Jenkins `admin` user. Optional.
pub const PASSWORD_HASH: &str = "password_hash";
/// Externally reachable Jenkins URL. Optional.
pub const JENKINS_URL: &str = "jenkins_url";

/// Keys that must be present before composition starts, in reporting order.
pub const REQUIRED: &[&str] = &[
    AWS_ACCESS_KEY,
    AWS_SECRET_ACCESS_KEY,
    AWS_S3_ACCESS_KEY,
    AWS_S3_SECRET_ACCESS_KEY,
    DIGITAL_OCEAN_KEY,
    GCE_PROJECT_ID,
    GCE_PRIVATE_KEY,
    GCE_CLIENT_EMAIL,
    TESTING_NAMESPACE_PREFIX,
    SLACK_CHANNEL,
    SLACK_WEBHOOK,
];

/// Flat mapping of parameter names to values.
///
/// Values are always strings. Numbers and booleans are accepted on input and
/// kept in their textual form, since the environment provider types values
/// like `123456789012` or `true` before they get here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Bool(b) => b.to_string(),
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for Parameters {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
        Ok(Self(raw.into_iter().map(|(k, v)| (k, v.into_text())).collect()))
    }
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a parameter that must be present.
    ///
    /// An empty value counts as present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::MissingParameter {
            key: key.to_string(),
        })
    }

    /// Check every key in `keys`, failing on the first one that is absent.
    pub fn require_all(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.require(key)?;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
