//! Capability parsing and negotiated session preferences
//!
//! Module-based capabilities arrive in the hello message as
//! `<namespace>?module=<name>&revision=<date>`. Everything else (`:candidate`,
//! `:rollback-on-error`, ...) is kept as an opaque string.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::message::{
    CANDIDATE_CAPABILITY, NETCONF_MONITORING_NS, NOTIFICATION_CAPABILITY,
    ROLLBACK_ON_ERROR_CAPABILITY, WRITABLE_RUNNING_CAPABILITY,
};
use crate::qname::QName;
use crate::schema::SourceIdentifier;

const MODULE_PARAM: &str = "module=";
const REVISION_PARAM: &str = "revision=";
// Some devices escape '&' twice, leaving "amp;revision=" after splitting
const BROKEN_REVISION_PARAM: &str = "amp;revision=";

/// A YANG module advertised by the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Capability {
    pub namespace: String,
    pub revision: Option<String>,
    pub module_name: String,
}

impl Capability {
    /// Create a capability from its parts
    pub fn new(
        namespace: impl Into<String>,
        revision: Option<String>,
        module_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            revision,
            module_name: module_name.into(),
        }
    }

    /// Parse a module-based capability string
    ///
    /// Returns `None` when the string carries no `module=` parameter.
    pub fn parse(capability: &str) -> Option<Self> {
        let (namespace, query) = capability.split_once('?')?;

        let mut module_name = None;
        let mut revision = None;
        let mut broken_revision = None;

        for param in query.split('&') {
            if let Some(name) = param.strip_prefix(MODULE_PARAM) {
                module_name = Some(name.to_string());
            } else if let Some(rev) = param.strip_prefix(REVISION_PARAM) {
                revision = Some(rev.to_string());
            } else if let Some(rev) = param.strip_prefix(BROKEN_REVISION_PARAM) {
                broken_revision = Some(rev.to_string());
            }
        }

        let module_name = module_name.filter(|m| !m.is_empty())?;

        let revision = match (revision, broken_revision) {
            (Some(rev), _) => {
                // revision=revision=2014-01-08
                match rev.strip_prefix(REVISION_PARAM) {
                    Some(inner) => {
                        tracing::warn!(
                            capability,
                            "device reported doubly prefixed revision, using {}",
                            inner
                        );
                        Some(inner.to_string())
                    }
                    None => Some(rev),
                }
            }
            (None, Some(rev)) => {
                tracing::warn!(capability, "device reported incorrectly escaped revision");
                Some(rev)
            }
            (None, None) => None,
        }
        .filter(|r| !r.is_empty());

        Some(Self {
            namespace: namespace.to_string(),
            revision,
            module_name,
        })
    }

    /// QName of the module
    pub fn qname(&self) -> QName {
        QName::with_revision(
            self.namespace.clone(),
            self.revision.clone(),
            self.module_name.clone(),
        )
    }

    /// Identifier used for schema source lookups
    pub fn source_id(&self) -> SourceIdentifier {
        SourceIdentifier::new(&self.module_name, self.revision.as_deref())
    }
}

/// Capabilities negotiated for one session
#[derive(Debug, Clone, Default)]
pub struct SessionPreferences {
    raw: BTreeSet<String>,
    module_caps: BTreeSet<Capability>,
    non_module_caps: BTreeSet<String>,
}

impl SessionPreferences {
    /// Classify the capability strings from the hello message
    pub fn from_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefs = Self::default();
        for cap in capabilities {
            let cap = cap.as_ref().trim();
            if cap.is_empty() {
                continue;
            }
            prefs.raw.insert(cap.to_string());
            match Capability::parse(cap) {
                Some(module) => {
                    prefs.module_caps.insert(module);
                }
                None => {
                    prefs.non_module_caps.insert(cap.to_string());
                }
            }
        }
        prefs
    }

    /// Every capability string as advertised
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.raw
    }

    /// Module-based capabilities
    pub fn module_capabilities(&self) -> &BTreeSet<Capability> {
        &self.module_caps
    }

    /// Capabilities that are not YANG modules
    pub fn non_module_capabilities(&self) -> &BTreeSet<String> {
        &self.non_module_caps
    }

    /// Exact match on the raw capability string, or prefix match ignoring the query part
    pub fn contains_capability(&self, capability: &str) -> bool {
        self.raw.contains(capability)
            || self
                .raw
                .iter()
                .any(|c| c.split('?').next() == Some(capability))
    }

    pub fn is_candidate_supported(&self) -> bool {
        self.contains_capability(CANDIDATE_CAPABILITY)
    }

    pub fn is_rollback_supported(&self) -> bool {
        self.contains_capability(ROLLBACK_ON_ERROR_CAPABILITY)
    }

    pub fn is_running_writable(&self) -> bool {
        self.contains_capability(WRITABLE_RUNNING_CAPABILITY)
    }

    pub fn is_notifications_supported(&self) -> bool {
        self.contains_capability(NOTIFICATION_CAPABILITY)
    }

    /// Whether `get-schema` can be used
    pub fn is_monitoring_supported(&self) -> bool {
        self.contains_capability(NETCONF_MONITORING_NS)
            || self
                .module_caps
                .iter()
                .any(|c| c.namespace == NETCONF_MONITORING_NS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_revision_before_module() {
        let cap = Capability::parse("urn:example:mod?revision=2014-01-08&module=example-mod").unwrap();
        assert_eq!(
            cap,
            Capability::new("urn:example:mod", Some("2014-01-08".into()), "example-mod")
        );
    }

    #[test]
    fn test_parse_without_revision() {
        let cap = Capability::parse("urn:example:mod?module=example-mod").unwrap();
        assert_eq!(cap.revision, None);
        assert_eq!(cap.module_name, "example-mod");
    }

    #[test]
    fn test_parse_doubled_revision_prefix() {
        let cap = Capability::parse("urn:x?module=x&revision=revision=2013-07-15").unwrap();
        assert_eq!(cap.revision.as_deref(), Some("2013-07-15"));

        let cap = Capability::parse("urn:x?module=x&amp;revision=2013-07-15").unwrap();
        assert_eq!(cap.revision.as_deref(), Some("2013-07-15"));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!(Capability::parse("urn:x?Module=x").is_none());
        assert!(Capability::parse(CANDIDATE_CAPABILITY).is_none());
    }

    #[test]
    fn test_session_preferences() {
        let prefs = SessionPreferences::from_capabilities([
            ROLLBACK_ON_ERROR_CAPABILITY,
            CANDIDATE_CAPABILITY,
            NETCONF_MONITORING_NS,
            "urn:opendaylight:params:xml:ns:test?module=test-module&revision=2014-06-02",
        ]);

        assert!(prefs.is_rollback_supported());
        assert!(prefs.is_candidate_supported());
        assert!(prefs.is_monitoring_supported());
        assert!(!prefs.is_notifications_supported());
        assert_eq!(prefs.module_capabilities().len(), 1);
        assert_eq!(prefs.non_module_capabilities().len(), 3);
        assert!(prefs.contains_capability("urn:opendaylight:params:xml:ns:test"));
    }
}
