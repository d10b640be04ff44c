//! Client-side request building utilities
//!
//! Helpers for constructing the operation bodies of NETCONF RPCs. The
//! `rpc` envelope and `message-id` are added by the
//! [`RequestCorrelator`](crate::correlator::RequestCorrelator).

use std::fmt;

use crate::message::{
    Element, NETCONF_BASE_NS, NETCONF_MONITORING_NS, NETCONF_NOTIFICATION_NS,
};
use crate::qname::QName;

/// `format` leaf value of get-schema
pub const YANG_SCHEMA_FORMAT: &str = "yang";
/// `error-option` value requesting device-side rollback
pub const ROLLBACK_ON_ERROR_OPTION: &str = "rollback-on-error";

/// Configuration datastore addressed by an RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Candidate,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Candidate => "candidate",
        }
    }

    fn element(&self) -> Element {
        Element::new(NETCONF_BASE_NS, self.as_str())
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RPC ready to be handed to the correlator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    /// Name of the operation
    pub name: QName,
    /// Operation node placed inside `rpc`
    pub body: Element,
}

impl RpcRequest {
    fn new(name: QName, body: Element) -> Self {
        Self { name, body }
    }

    fn base(operation: &str) -> Self {
        Self::new(
            QName::new(NETCONF_BASE_NS, operation),
            Element::new(NETCONF_BASE_NS, operation),
        )
    }
}

/// Build an `edit-config` request
///
/// # Arguments
/// * `target` - Datastore to edit
/// * `config` - The `config` element produced by [`YangPath::edit_structure`](crate::instance_id::YangPath::edit_structure)
/// * `default_operation` - Value of `default-operation`, if any
/// * `rollback_on_error` - Add `error-option rollback-on-error`
pub fn edit_config(
    target: Datastore,
    config: Element,
    default_operation: Option<&str>,
    rollback_on_error: bool,
) -> RpcRequest {
    let mut request = RpcRequest::base("edit-config");
    request.body.children.push(
        Element::new(NETCONF_BASE_NS, "target").with_child(target.element()),
    );
    if let Some(op) = default_operation {
        request
            .body
            .children
            .push(Element::leaf(NETCONF_BASE_NS, "default-operation", op));
    }
    if rollback_on_error {
        request.body.children.push(Element::leaf(
            NETCONF_BASE_NS,
            "error-option",
            ROLLBACK_ON_ERROR_OPTION,
        ));
    }
    request.body.children.push(config);
    request
}

/// Build a `commit` request
pub fn commit() -> RpcRequest {
    RpcRequest::base("commit")
}

/// Build a `discard-changes` request
pub fn discard_changes() -> RpcRequest {
    RpcRequest::base("discard-changes")
}

/// Build a `get-config` request, optionally restricted by a subtree filter
pub fn get_config(source: Datastore, filter: Option<Element>) -> RpcRequest {
    let mut request = RpcRequest::base("get-config");
    request.body.children.push(
        Element::new(NETCONF_BASE_NS, "source").with_child(source.element()),
    );
    request.body.children.extend(filter);
    request
}

/// Build a `get` request, optionally restricted by a subtree filter
pub fn get(filter: Option<Element>) -> RpcRequest {
    let mut request = RpcRequest::base("get");
    request.body.children.extend(filter);
    request
}

/// Build a `get-schema` request (ietf-netconf-monitoring)
pub fn get_schema(identifier: &str, version: Option<&str>) -> RpcRequest {
    let mut body = Element::new(NETCONF_MONITORING_NS, "get-schema")
        .with_child(Element::leaf(NETCONF_MONITORING_NS, "identifier", identifier));
    if let Some(version) = version {
        body.children
            .push(Element::leaf(NETCONF_MONITORING_NS, "version", version));
    }
    body.children.push(Element::leaf(
        NETCONF_MONITORING_NS,
        "format",
        YANG_SCHEMA_FORMAT,
    ));
    RpcRequest::new(QName::new(NETCONF_MONITORING_NS, "get-schema"), body)
}

/// Build a `create-subscription` request for the default event stream
pub fn create_subscription(stream: Option<&str>) -> RpcRequest {
    let mut body = Element::new(NETCONF_NOTIFICATION_NS, "create-subscription");
    if let Some(stream) = stream {
        body.children
            .push(Element::leaf(NETCONF_NOTIFICATION_NS, "stream", stream));
    }
    RpcRequest::new(
        QName::new(NETCONF_NOTIFICATION_NS, "create-subscription"),
        body,
    )
}
