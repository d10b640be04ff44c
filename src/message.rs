//! NETCONF message model and protocol constants
//!
//! Messages are exchanged with the transport as structured documents. The
//! core only looks at envelope nodes (`rpc`, `rpc-reply`, `notification`) and
//! leaves payload interpretation to the [`MessageTransformer`](crate::transform::MessageTransformer).

use crate::qname::QName;

/// NETCONF base namespace
pub const NETCONF_BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// ietf-netconf-monitoring namespace (get-schema lives here)
pub const NETCONF_MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";
/// RFC 5277 notification namespace
pub const NETCONF_NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
/// ietf-netconf-notifications namespace (netconf-capability-change)
pub const NETCONF_NOTIFICATIONS_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications";

/// `:candidate` capability
pub const CANDIDATE_CAPABILITY: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
/// `:rollback-on-error` capability
pub const ROLLBACK_ON_ERROR_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
/// `:writable-running` capability
pub const WRITABLE_RUNNING_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:writable-running:1.0";
/// `:notification` capability
pub const NOTIFICATION_CAPABILITY: &str = "urn:ietf:params:netconf:capability:notification:1.0";

/// Attribute carrying the request/reply correlation identifier
pub const MESSAGE_ID_ATTR: &str = "message-id";

/// A namespace-qualified attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

/// A node of a structured protocol document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Local name
    pub name: String,
    /// Namespace URI, if any
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
    /// Text content for leaf nodes
    pub text: Option<String>,
}

impl Element {
    /// Create an empty element in the given namespace
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Self::default()
        }
    }

    /// Create an element named by a QName
    pub fn from_qname(qname: &QName) -> Self {
        Self::new(&qname.namespace, &qname.local_name)
    }

    /// Create a leaf element carrying text
    pub fn leaf(namespace: &str, name: &str, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(namespace, name)
        }
    }

    /// Append a child, consuming and returning self
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children
    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set an attribute without namespace
    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            namespace: None,
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    /// Set a namespace-qualified attribute
    pub fn with_ns_attribute(mut self, namespace: &str, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    /// Look up an attribute by local name, ignoring its namespace
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// First child with the given local name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First child with the given namespace and local name
    pub fn child_ns(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name == name && c.namespace.as_deref() == Some(namespace))
    }

    /// All children with the given local name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child with the given name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text.as_deref())
    }

    /// QName of this element, when it has a namespace
    pub fn qname(&self) -> Option<QName> {
        self.namespace
            .as_ref()
            .map(|ns| QName::new(ns.clone(), self.name.clone()))
    }

    /// Check namespace and local name
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }
}

/// Classification of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `rpc-reply` root
    Reply,
    /// `notification` root
    Notification,
    /// Anything else (hello, unexpected rpc, ...)
    Other,
}

/// A whole protocol message as delivered by or handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetconfMessage {
    root: Element,
}

impl NetconfMessage {
    /// Wrap a document root
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Build an `rpc` request carrying the given message-id and operation body
    pub fn rpc(message_id: &str, body: Element) -> Self {
        let root = Element::new(NETCONF_BASE_NS, "rpc")
            .with_attribute(MESSAGE_ID_ATTR, message_id)
            .with_child(body);
        Self { root }
    }

    /// Document root
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Consume the message and return its root
    pub fn into_root(self) -> Element {
        self.root
    }

    /// The `message-id` attribute of the root, if present
    pub fn message_id(&self) -> Option<&str> {
        self.root.attribute(MESSAGE_ID_ATTR)
    }

    /// Classify by root element name
    pub fn kind(&self) -> MessageKind {
        match self.root.name.as_str() {
            "rpc-reply" => MessageKind::Reply,
            "notification" => MessageKind::Notification,
            _ => MessageKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_envelope() {
        let msg = NetconfMessage::rpc("7", Element::new(NETCONF_BASE_NS, "commit"));
        assert_eq!(msg.message_id(), Some("7"));
        assert!(msg.root().is(NETCONF_BASE_NS, "rpc"));
        assert!(msg.root().child("commit").is_some());
        assert_eq!(msg.kind(), MessageKind::Other);
    }

    #[test]
    fn test_classification() {
        let reply = NetconfMessage::new(Element::new(NETCONF_BASE_NS, "rpc-reply"));
        let notif = NetconfMessage::new(Element::new(NETCONF_NOTIFICATION_NS, "notification"));
        assert_eq!(reply.kind(), MessageKind::Reply);
        assert_eq!(notif.kind(), MessageKind::Notification);
    }

    #[test]
    fn test_child_lookup() {
        let el = Element::new("urn:a", "top")
            .with_child(Element::leaf("urn:a", "name", "x"))
            .with_child(Element::leaf("urn:b", "name", "y"));
        assert_eq!(el.child_text("name"), Some("x"));
        assert_eq!(el.child_ns("urn:b", "name").and_then(|c| c.text.as_deref()), Some("y"));
        assert_eq!(el.children_named("name").count(), 2);
    }
}
