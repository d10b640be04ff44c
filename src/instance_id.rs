//! Instance identifiers for configuration data
//!
//! A [`YangPath`] addresses one data node, e.g.
//! `/ietf-interfaces:interfaces/interface[name='eth0']/mtu`. The first
//! segment carries the module prefix; later segments inherit the namespace
//! of their parent unless they name another module. List entries are
//! selected with key predicates.
//!
//! Paths are turned into nested element structures for `edit-config`
//! payloads and subtree filters: every ancestor becomes a synthetic element
//! holding the key leaves of its list entry.

use std::fmt;

use crate::error::{NetconfError, Result};
use crate::message::{Element, NETCONF_BASE_NS};
use crate::qname::QName;
use crate::schema::SchemaContext;

/// One step of a path: a node name and, for list entries, its key values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathArgument {
    pub name: QName,
    pub keys: Vec<(QName, String)>,
}

impl PathArgument {
    /// A container or leaf step
    pub fn node(name: QName) -> Self {
        Self {
            name,
            keys: Vec::new(),
        }
    }

    /// A list entry step
    pub fn entry(name: QName, keys: Vec<(QName, String)>) -> Self {
        Self { name, keys }
    }

    fn is_key(&self, element: &Element) -> bool {
        self.keys.iter().any(|(key, _)| {
            key.local_name == element.name && element.namespace.as_deref() == Some(&key.namespace)
        })
    }

    /// Element for this step with its key leaves as the first children
    fn element(&self) -> Element {
        Element::from_qname(&self.name).with_children(
            self.keys
                .iter()
                .map(|(key, value)| Element::leaf(&key.namespace, &key.local_name, value.clone())),
        )
    }
}

/// Absolute path to a data node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YangPath {
    args: Vec<PathArgument>,
}

impl YangPath {
    pub fn new(args: Vec<PathArgument>) -> Self {
        Self { args }
    }

    /// Parse a path like `/module:container/list[key='value']/leaf`
    ///
    /// Module prefixes are resolved against the schema context.
    pub fn parse(path: &str, schema: &SchemaContext) -> Result<Self> {
        let mut args = Vec::new();
        let mut current: Option<(String, Option<String>)> = None;

        for segment in split_segments(path)? {
            let (prefix, local, keys) = parse_segment(path, segment)?;

            if let Some(prefix) = prefix {
                let module = schema.module_by_name(prefix).ok_or_else(|| {
                    NetconfError::InvalidPath(format!("{path}: unknown module '{prefix}'"))
                })?;
                current = Some((module.namespace.clone(), module.revision.clone()));
            }
            let Some((namespace, revision)) = current.clone() else {
                return Err(NetconfError::InvalidPath(format!(
                    "{path}: first segment must carry a module prefix"
                )));
            };

            let name = QName::with_revision(namespace, revision, local);
            let keys = keys
                .into_iter()
                .map(|(key, value)| (name.sibling(key), value))
                .collect();
            args.push(PathArgument::entry(name, keys));
        }

        Ok(Self { args })
    }

    pub fn args(&self) -> &[PathArgument] {
        &self.args
    }

    /// The addressed node
    pub fn last(&self) -> Option<&PathArgument> {
        self.args.last()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Build the `config` element of an `edit-config` for this path
    ///
    /// The deepest element receives the `operation` attribute (if any) and
    /// the payload children; payload children repeating a key leaf are
    /// skipped since the key is already present.
    pub fn edit_structure(&self, operation: Option<&str>, payload: Vec<Element>) -> Result<Element> {
        let (last, ancestors) = self
            .args
            .split_last()
            .ok_or_else(|| NetconfError::InvalidPath("empty path".into()))?;

        let mut deepest = last.element();
        if let Some(op) = operation {
            deepest = deepest.with_ns_attribute(NETCONF_BASE_NS, "operation", op);
        }
        deepest
            .children
            .extend(payload.into_iter().filter(|child| !last.is_key(child)));

        let nested = nest(ancestors, deepest);
        Ok(Element::new(NETCONF_BASE_NS, "config").with_child(nested))
    }

    /// Build a subtree `filter` selecting this node
    pub fn to_filter(&self) -> Result<Element> {
        let (last, ancestors) = self
            .args
            .split_last()
            .ok_or_else(|| NetconfError::InvalidPath("empty path".into()))?;

        let nested = nest(ancestors, last.element());
        Ok(Element::new(NETCONF_BASE_NS, "filter")
            .with_attribute("type", "subtree")
            .with_child(nested))
    }
}

impl fmt::Display for YangPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for arg in &self.args {
            write!(f, "/{}", arg.name.local_name)?;
            for (key, value) in &arg.keys {
                write!(f, "[{}='{}']", key.local_name, value)?;
            }
        }
        Ok(())
    }
}

/// Wrap `deepest` in synthetic ancestors, innermost first
fn nest(ancestors: &[PathArgument], deepest: Element) -> Element {
    ancestors
        .iter()
        .rev()
        .fold(deepest, |child, arg| arg.element().with_child(child))
}

fn invalid(path: &str, reason: &str) -> NetconfError {
    NetconfError::InvalidPath(format!("{path}: {reason}"))
}

/// Split on '/' outside predicates and quoted values
fn split_segments(path: &str) -> Result<Vec<&str>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| invalid(path, "must start with '/'"))?;

    let mut segments = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(path, "unbalanced ']'"))?;
            }
            (None, '/') if depth == 0 => {
                segments.push(&rest[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(invalid(path, "unterminated predicate"));
    }
    segments.push(&rest[start..]);

    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(path, "empty segment"));
    }
    Ok(segments)
}

type Segment<'a> = (Option<&'a str>, &'a str, Vec<(&'a str, String)>);

fn parse_segment<'a>(path: &str, segment: &'a str) -> Result<Segment<'a>> {
    let (head, mut predicates) = match segment.find('[') {
        Some(i) => segment.split_at(i),
        None => (segment, ""),
    };

    let (prefix, local) = match head.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, head),
    };
    if local.is_empty() || prefix.is_some_and(str::is_empty) {
        return Err(invalid(path, "empty node name"));
    }

    let mut keys = Vec::new();
    while !predicates.is_empty() {
        let end = predicate_end(predicates).ok_or_else(|| invalid(path, "malformed predicate"))?;
        let inner = &predicates[1..end];
        predicates = &predicates[end + 1..];

        let (key, value) = inner
            .split_once('=')
            .ok_or_else(|| invalid(path, "predicate without '='"))?;
        let key = key.trim();
        // key leaves always live in the list's namespace
        let key = key.rsplit(':').next().unwrap_or(key);
        let value = unquote(value.trim()).ok_or_else(|| invalid(path, "unquoted key value"))?;
        if key.is_empty() {
            return Err(invalid(path, "empty key name"));
        }
        keys.push((key, value.to_string()));
    }

    Ok((prefix, local, keys))
}

/// Index of the ']' closing the predicate at the start of `s`
fn predicate_end(s: &str) -> Option<usize> {
    if !s.starts_with('[') {
        return None;
    }
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> Option<&str> {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModuleInfo;

    fn schema() -> SchemaContext {
        SchemaContext::new([
            ModuleInfo::new("ietf-interfaces", Some("2014-05-08"), "urn:ietf:interfaces"),
            ModuleInfo::new("ext", None, "urn:ext"),
        ])
    }

    #[test]
    fn test_parse_path_with_keys() {
        let path = YangPath::parse(
            "/ietf-interfaces:interfaces/interface[name='eth/0']/ext:speed",
            &schema(),
        )
        .unwrap();

        assert_eq!(path.len(), 3);
        let entry = &path.args()[1];
        assert_eq!(entry.name.local_name, "interface");
        assert_eq!(entry.name.namespace, "urn:ietf:interfaces");
        assert_eq!(entry.name.revision.as_deref(), Some("2014-05-08"));
        assert_eq!(entry.keys[0].0.local_name, "name");
        assert_eq!(entry.keys[0].1, "eth/0");
        assert_eq!(path.last().unwrap().name.namespace, "urn:ext");
        assert_eq!(path.to_string(), "/interfaces/interface[name='eth/0']/speed");
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        let ctx = schema();
        for bad in [
            "interfaces",
            "/interfaces",
            "/unknown:x",
            "/ietf-interfaces:a//b",
            "/ietf-interfaces:a[name='x'",
            "/ietf-interfaces:a[name=x]",
        ] {
            assert!(
                matches!(YangPath::parse(bad, &ctx), Err(NetconfError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_edit_structure_nests_ancestors() {
        let path = YangPath::parse(
            "/ietf-interfaces:interfaces/interface[name='eth0']",
            &schema(),
        )
        .unwrap();
        let ns = "urn:ietf:interfaces";
        let payload = vec![
            Element::leaf(ns, "name", "eth0"),
            Element::leaf(ns, "mtu", "1500"),
        ];

        let config = path.edit_structure(Some("replace"), payload).unwrap();
        assert!(config.is(NETCONF_BASE_NS, "config"));

        let interfaces = config.child("interfaces").unwrap();
        assert!(interfaces.attributes.is_empty());
        let interface = interfaces.child("interface").unwrap();
        assert_eq!(interface.attribute("operation"), Some("replace"));
        // key leaf once, from the path, then the payload
        assert_eq!(interface.children_named("name").count(), 1);
        assert_eq!(interface.children[0].name, "name");
        assert_eq!(interface.child_text("mtu"), Some("1500"));
    }

    #[test]
    fn test_edit_structure_without_operation() {
        let path = YangPath::parse("/ietf-interfaces:interfaces", &schema()).unwrap();
        let config = path.edit_structure(None, Vec::new()).unwrap();
        assert!(config.child("interfaces").unwrap().attributes.is_empty());
        assert!(YangPath::default().edit_structure(None, Vec::new()).is_err());
    }

    #[test]
    fn test_filter() {
        let path = YangPath::parse(
            "/ietf-interfaces:interfaces/interface[name='eth0']",
            &schema(),
        )
        .unwrap();
        let filter = path.to_filter().unwrap();
        assert_eq!(filter.attribute("type"), Some("subtree"));
        let interface = filter.child("interfaces").unwrap().child("interface").unwrap();
        assert_eq!(interface.child_text("name"), Some("eth0"));
    }
}
