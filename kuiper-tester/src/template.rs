//! Flat `{{key}}` substitution over template files.
//!
//! This is deliberately not a templating engine: there are no loops,
//! conditionals or includes. Each key replaces the first occurrence of its
//! marker and substituted values are never scanned again, so values may
//! contain `$`, braces or even other markers without being expanded.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Replace the first `{{key}}` marker for every key in `vars`.
///
/// Keys missing from the template are ignored and markers without a value
/// are left in place. A key that appears twice in the template only has its
/// first occurrence replaced.
pub fn render<K, V>(template: &str, vars: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    // Match positions are taken from the unmodified template, so output of
    // one substitution can never be matched by another.
    let mut hits: Vec<(usize, usize, V)> = Vec::new();
    for (key, value) in vars {
        let marker = format!("{{{{{}}}}}", key.as_ref());
        if let Some(start) = template.find(&marker) {
            hits.push((start, start + marker.len(), value));
        }
    }
    hits.sort_by_key(|(start, _, _)| *start);

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for (start, end, value) in hits {
        if start < cursor {
            continue;
        }
        out.push_str(&template[cursor..start]);
        out.push_str(value.as_ref());
        cursor = end;
    }
    out.push_str(&template[cursor..]);
    out
}

/// Source of raw template text, addressed by a relative name.
pub trait TemplateSource {
    /// Read the named template. A missing template is an error.
    fn read(&self, name: &str) -> Result<String>;

    /// Read the named template and [`render`] it.
    fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        let template = self.read(name)?;
        Ok(render(&template, vars.iter().copied()))
    }
}

/// Templates stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct TemplateDir {
    root: PathBuf,
}

impl TemplateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateSource for TemplateDir {
    fn read(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        debug!("Reading template {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::TemplateFileNotFound { path }),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory templates, keyed by name.
impl TemplateSource for BTreeMap<String, String> {
    fn read(&self, name: &str) -> Result<String> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateFileNotFound { path: PathBuf::from(name) })
    }
}
