//! XML text codec for protocol messages
//!
//! Converts between [`Element`] trees and XML text at the transport boundary.
//! Namespace declarations and prefixes are resolved on read; on write every
//! element whose namespace differs from its parent's gets a default `xmlns`.

use std::collections::HashMap;
use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{NetconfError, Result};
use crate::message::{Attribute, Element, NETCONF_BASE_NS, NetconfMessage};

type Scope = HashMap<String, String>;

fn xml_err(e: impl Display) -> NetconfError {
    NetconfError::Xml(e.to_string())
}

/// Parse a whole XML document into its root element
pub fn parse(input: &str) -> Result<Element> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<Scope> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let element = open_element(&e, &mut scopes)?;
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = open_element(&e, &mut scopes)?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| NetconfError::Xml("unbalanced end tag".into()))?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?;
                append_text(&mut stack, &text);
            }
            Event::CData(c) => {
                let bytes = c.into_inner();
                append_text(&mut stack, &String::from_utf8_lossy(&bytes));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(NetconfError::Xml("unexpected end of document".into()));
    }
    root.ok_or_else(|| NetconfError::Xml("document has no root element".into()))
}

/// Parse a whole XML document into a message
pub fn parse_message(input: &str) -> Result<NetconfMessage> {
    parse(input).map(NetconfMessage::new)
}

fn open_element(start: &BytesStart<'_>, scopes: &mut Vec<Scope>) -> Result<Element> {
    let mut scope = scopes.last().cloned().unwrap_or_default();
    let mut raw_attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(xml_err)?
            .to_string();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        } else {
            raw_attributes.push((key, value));
        }
    }

    let qname = start.name();
    let raw_name = std::str::from_utf8(qname.as_ref()).map_err(xml_err)?;
    let (prefix, local) = split_prefixed(raw_name);
    let namespace = match prefix {
        Some(p) => Some(
            scope
                .get(p)
                .cloned()
                .ok_or_else(|| NetconfError::Xml(format!("undeclared prefix: {}", p)))?,
        ),
        None => scope.get("").filter(|ns| !ns.is_empty()).cloned(),
    };

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (prefix, local) = split_prefixed(&key);
        // Unprefixed attributes never take the default namespace
        let namespace = match prefix {
            Some(p) => scope.get(p).cloned(),
            None => None,
        };
        attributes.push(Attribute {
            namespace,
            name: local.to_string(),
            value,
        });
    }

    scopes.push(scope);
    Ok(Element {
        name: local.to_string(),
        namespace,
        attributes,
        children: Vec::new(),
        text: None,
    })
}

fn split_prefixed(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(NetconfError::Xml("multiple root elements".into())),
    }
}

fn append_text(stack: &mut [Element], text: &str) {
    if let Some(top) = stack.last_mut() {
        match &mut top.text {
            Some(existing) => existing.push_str(text),
            None => top.text = Some(text.to_string()),
        }
    }
}

/// Serialize an element tree to XML text
pub fn to_string(element: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, element, None)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

/// Serialize a message to XML text
pub fn message_to_string(message: &NetconfMessage) -> Result<String> {
    to_string(message.root())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    parent_ns: Option<&str>,
) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());

    match (element.namespace.as_deref(), parent_ns) {
        (Some(ns), parent) if Some(ns) != parent => start.push_attribute(("xmlns", ns)),
        // undeclare the inherited default namespace
        (None, Some(_)) => start.push_attribute(("xmlns", "")),
        _ => {}
    }

    // namespace -> prefix declared on this element
    let mut declared: Vec<(&str, String)> = Vec::new();
    for attr in &element.attributes {
        match attr.namespace.as_deref() {
            Some(ns) => {
                let prefix = match declared.iter().find(|(d, _)| *d == ns) {
                    Some((_, prefix)) => prefix.clone(),
                    None => {
                        let prefix = if ns == NETCONF_BASE_NS {
                            "nc".to_string()
                        } else {
                            format!("a{}", declared.len())
                        };
                        let decl = format!("xmlns:{}", prefix);
                        start.push_attribute((decl.as_str(), ns));
                        declared.push((ns, prefix.clone()));
                        prefix
                    }
                };
                let qualified = format!("{}:{}", prefix, attr.name);
                start.push_attribute((qualified.as_str(), attr.value.as_str()));
            }
            None => start.push_attribute((attr.name.as_str(), attr.value.as_str())),
        }
    }

    if element.children.is_empty() && element.text.is_none() {
        writer.write_event(Event::Empty(start)).map_err(xml_err)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start.borrow()))
        .map_err(xml_err)?;
    if let Some(text) = &element.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
    }
    for child in &element.children {
        write_element(writer, child, element.namespace.as_deref())?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    const ERROR_REPLY: &str = r#"
        <rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="101">
          <rpc-error>
            <error-type>rpc</error-type>
            <error-tag>missing-attribute</error-tag>
            <error-severity>error</error-severity>
            <error-message>Missing attribute</error-message>
            <error-info>
              <bad-attribute>foo</bad-attribute>
              <bad-element>bar</bad-element>
            </error-info>
          </rpc-error>
        </rpc-reply>"#;

    #[test]
    fn test_parse_reply() {
        let msg = parse_message(ERROR_REPLY).unwrap();
        assert_eq!(msg.kind(), MessageKind::Reply);
        assert_eq!(msg.message_id(), Some("101"));

        let error = msg.root().child("rpc-error").unwrap();
        assert_eq!(error.namespace.as_deref(), Some(NETCONF_BASE_NS));
        assert_eq!(error.child_text("error-tag"), Some("missing-attribute"));
        assert_eq!(error.child("error-info").unwrap().children.len(), 2);
    }

    #[test]
    fn test_prefixed_names_resolve() {
        let doc = r#"<nc:rpc xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:message-id="3">
            <get-schema xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring">
              <identifier>a &amp; b</identifier>
            </get-schema>
          </nc:rpc>"#;
        let root = parse(doc).unwrap();
        assert!(root.is(NETCONF_BASE_NS, "rpc"));
        assert_eq!(root.attribute("message-id"), Some("3"));
        assert_eq!(
            root.attributes[0].namespace.as_deref(),
            Some(NETCONF_BASE_NS)
        );
        let body = root.child("get-schema").unwrap();
        assert_eq!(body.child_text("identifier"), Some("a & b"));
    }

    #[test]
    fn test_write_then_read_preserves_operation_attribute() {
        let el = Element::new("urn:a", "top").with_child(
            Element::new("urn:a", "b").with_ns_attribute(NETCONF_BASE_NS, "operation", "remove"),
        );
        let text = to_string(&el).unwrap();
        assert!(text.contains(r#"nc:operation="remove""#));

        let back = parse(&text).unwrap();
        assert_eq!(back, el);
    }

    #[test]
    fn test_attributes_share_one_prefix_declaration() {
        let el = Element::new("urn:a", "b")
            .with_ns_attribute(NETCONF_BASE_NS, "operation", "replace")
            .with_ns_attribute(NETCONF_BASE_NS, "insert", "first")
            .with_ns_attribute("urn:x", "tag", "1");
        let text = to_string(&el).unwrap();
        assert_eq!(text.matches("xmlns:nc=").count(), 1);

        let back = parse(&text).unwrap();
        assert_eq!(back, el);
    }

    #[test]
    fn test_unqualified_child_keeps_empty_namespace() {
        let el = Element::new("urn:a", "top").with_child(Element {
            name: "plain".into(),
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
            text: Some("x".into()),
        });
        let text = to_string(&el).unwrap();
        assert!(text.contains(r#"<plain xmlns="">"#));

        let back = parse(&text).unwrap();
        assert_eq!(back.children[0].namespace, None);
        assert_eq!(back, el);
    }

    #[test]
    fn test_rejects_truncated_document() {
        assert!(parse("<a xmlns=\"urn:a\"><b>").is_err());
        assert!(parse("").is_err());
    }
}
