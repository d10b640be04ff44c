//! Schema sources, schema contexts and the external parser contract

mod cache;
mod resolver;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use cache::SchemaSourceCache;
pub use resolver::{
    RemoteSchemaProvider, ResolvedSchema, SchemaSourceResolver, UnavailableCapability,
    UnavailableReason,
};

use crate::qname::QName;

/// Identifies one schema source by module name and optional revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentifier {
    pub name: String,
    pub revision: Option<String>,
}

impl SourceIdentifier {
    pub fn new(name: &str, revision: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            revision: revision.map(str::to_string),
        }
    }

    /// Whether the name is a YANG identifier and the revision a `YYYY-MM-DD` date
    ///
    /// Only such identifiers are turned into cache file names.
    pub fn is_well_formed(&self) -> bool {
        is_yang_identifier(&self.name) && self.revision.as_deref().is_none_or(is_revision_date)
    }

    /// Cache file name: `name@revision.yang` or `name.yang`
    pub fn file_name(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}@{}.yang", self.name, rev),
            None => format!("{}.yang", self.name),
        }
    }

    /// Inverse of [`file_name`](Self::file_name)
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".yang")?;
        if stem.is_empty() {
            return None;
        }
        let id = match stem.split_once('@') {
            Some((name, rev)) => Self::new(name, Some(rev)),
            None => Self::new(stem, None),
        };
        id.is_well_formed().then_some(id)
    }
}

fn is_yang_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_revision_date(revision: &str) -> bool {
    let bytes = revision.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}@{}", self.name, rev),
            None => f.write_str(&self.name),
        }
    }
}

/// Raw YANG text for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSource {
    pub id: SourceIdentifier,
    pub text: Arc<str>,
}

impl SchemaSource {
    pub fn new(id: SourceIdentifier, text: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// A module known to a schema context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleInfo {
    pub name: String,
    pub revision: Option<String>,
    pub namespace: String,
}

impl ModuleInfo {
    pub fn new(name: &str, revision: Option<&str>, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            revision: revision.map(str::to_string),
            namespace: namespace.to_string(),
        }
    }

    pub fn qname(&self) -> QName {
        QName::with_revision(self.namespace.clone(), self.revision.clone(), self.name.clone())
    }
}

/// Parsed, immutable set of modules shared by every component of a session
///
/// Cloning is cheap; all clones see the same modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaContext {
    modules: Arc<BTreeSet<ModuleInfo>>,
}

impl SchemaContext {
    /// Build a context from parsed modules (used by parser implementations)
    pub fn new(modules: impl IntoIterator<Item = ModuleInfo>) -> Self {
        Self {
            modules: Arc::new(modules.into_iter().collect()),
        }
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.iter()
    }

    /// QNames of all available modules
    pub fn module_qnames(&self) -> BTreeSet<QName> {
        self.modules.iter().map(ModuleInfo::qname).collect()
    }

    pub fn module_by_name(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_by_namespace(&self, namespace: &str) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.namespace == namespace)
    }

    pub fn contains_module(&self, name: &str) -> bool {
        self.module_by_name(name).is_some()
    }
}

/// Failure reported by a schema parser
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    /// Sources the parser could not use (missing imports, syntax errors);
    /// empty when the failure cannot be attributed to specific sources
    pub unresolved: Vec<SourceIdentifier>,
    pub message: String,
}

impl ParseError {
    /// A failure not attributable to any source
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            unresolved: Vec::new(),
            message: message.into(),
        }
    }

    /// A failure caused by the given sources
    pub fn unresolved(sources: Vec<SourceIdentifier>, message: impl Into<String>) -> Self {
        Self {
            unresolved: sources,
            message: message.into(),
        }
    }
}

/// External schema parser: raw sources in, schema context out
pub trait SchemaParser: Send + Sync {
    fn parse(&self, sources: &[SchemaSource]) -> std::result::Result<SchemaContext, ParseError>;
}
