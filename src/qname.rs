//! Qualified names for YANG nodes, RPCs and notifications

use std::fmt;

use serde::Serialize;

/// A namespace-qualified name with an optional module revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QName {
    pub namespace: String,
    pub revision: Option<String>,
    pub local_name: String,
}

impl QName {
    /// Create a QName without revision
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            revision: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a revision
    pub fn with_revision(
        namespace: impl Into<String>,
        revision: Option<String>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            revision,
            local_name: local_name.into(),
        }
    }

    /// Same namespace and revision, different local name
    pub fn sibling(&self, local_name: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace.clone(),
            revision: self.revision.clone(),
            local_name: local_name.into(),
        }
    }

    /// Compare namespace and local name only
    pub fn matches(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace == namespace && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "({}?revision={}){}", self.namespace, rev, self.local_name),
            None => write!(f, "({}){}", self.namespace, self.local_name),
        }
    }
}
