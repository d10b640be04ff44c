//! Schema-aware conversion between protocol elements and JSON
//!
//! Data and notification payloads are rendered in the YANG JSON style:
//! top-level members and members that switch namespace are qualified with
//! their module name (`{"example-1:greeting": {"author": "Obi"}}`), repeated
//! siblings become arrays and leaf values are kept as strings.

use serde_json::{Map, Value};

use crate::error::{NetconfError, Result};
use crate::message::{Element, MessageKind, NetconfMessage, NETCONF_NOTIFICATION_NS};
use crate::qname::QName;
use crate::schema::SchemaContext;

/// A notification decoded against the schema context
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Name of the notification node
    pub name: QName,
    /// `eventTime` as sent by the device
    pub event_time: Option<String>,
    /// Module-qualified JSON rendering of the notification content
    pub body: Value,
}

/// Converts messages and payloads using one schema context
#[derive(Debug, Clone)]
pub struct MessageTransformer {
    schema: SchemaContext,
}

impl MessageTransformer {
    pub fn new(schema: SchemaContext) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaContext {
        &self.schema
    }

    /// Decode a `notification` message
    pub fn to_notification(&self, message: &NetconfMessage) -> Result<Notification> {
        if message.kind() != MessageKind::Notification {
            return Err(NetconfError::Transform(format!(
                "expected notification, got <{}>",
                message.root().name
            )));
        }
        let root = message.root();

        let event_time = root
            .child_ns(NETCONF_NOTIFICATION_NS, "eventTime")
            .or_else(|| root.child("eventTime"))
            .and_then(|e| e.text.clone());

        let content = root
            .children
            .iter()
            .find(|c| c.name != "eventTime")
            .ok_or_else(|| NetconfError::Transform("notification without content".into()))?;
        let name = self.qualified_qname(content)?;

        let mut body = Map::new();
        body.insert(self.qualified_key(content, None)?, self.content_to_json(content)?);

        Ok(Notification {
            name,
            event_time,
            body: Value::Object(body),
        })
    }

    /// Render the children of a `data` element as one JSON object
    pub fn data_to_json(&self, data: &Element) -> Result<Value> {
        self.children_to_json(data, None)
    }

    /// Render one top-level element, e.g. `{"mod:top": {...}}`
    pub fn element_to_json(&self, element: &Element) -> Result<Value> {
        let mut map = Map::new();
        map.insert(self.qualified_key(element, None)?, self.content_to_json(element)?);
        Ok(Value::Object(map))
    }

    /// Turn a JSON object into child elements in `namespace`
    ///
    /// Members may be module-qualified to switch namespace. Arrays produce
    /// repeated elements, objects produce inner nodes, scalars produce leaves.
    pub fn json_to_elements(&self, namespace: &str, value: &Value) -> Result<Vec<Element>> {
        let Value::Object(map) = value else {
            return Err(NetconfError::Transform(format!(
                "payload must be a JSON object, got {value}"
            )));
        };

        let mut elements = Vec::new();
        for (key, member) in map {
            let (ns, name) = self.resolve_key(namespace, key)?;
            match member {
                Value::Array(items) => {
                    for item in items {
                        elements.push(self.json_to_element(&ns, name, item)?);
                    }
                }
                other => elements.push(self.json_to_element(&ns, name, other)?),
            }
        }
        Ok(elements)
    }

    fn json_to_element(&self, namespace: &str, name: &str, value: &Value) -> Result<Element> {
        Ok(match value {
            Value::Object(_) => Element::new(namespace, name)
                .with_children(self.json_to_elements(namespace, value)?),
            Value::Null => Element::new(namespace, name),
            Value::String(s) => Element::leaf(namespace, name, s.clone()),
            Value::Array(_) => {
                return Err(NetconfError::Transform(format!(
                    "nested array under '{name}'"
                )));
            }
            other => Element::leaf(namespace, name, other.to_string()),
        })
    }

    /// Split `module:name` and resolve the module namespace
    fn resolve_key<'a>(&self, namespace: &str, key: &'a str) -> Result<(String, &'a str)> {
        match key.split_once(':') {
            Some((module, name)) => {
                let info = self.schema.module_by_name(module).ok_or_else(|| {
                    NetconfError::Transform(format!("unknown module '{module}' in '{key}'"))
                })?;
                Ok((info.namespace.clone(), name))
            }
            None => Ok((namespace.to_string(), key)),
        }
    }

    fn qualified_qname(&self, element: &Element) -> Result<QName> {
        let namespace = element.namespace.as_deref().unwrap_or_default();
        let module = self.schema.module_by_namespace(namespace).ok_or_else(|| {
            NetconfError::Transform(format!(
                "no module in schema context for namespace '{namespace}' of <{}>",
                element.name
            ))
        })?;
        Ok(QName::with_revision(
            module.namespace.clone(),
            module.revision.clone(),
            element.name.clone(),
        ))
    }

    /// Member name: qualified when the namespace differs from the parent's
    fn qualified_key(&self, element: &Element, parent_ns: Option<&str>) -> Result<String> {
        if parent_ns.is_some() && element.namespace.as_deref() == parent_ns {
            return Ok(element.name.clone());
        }
        let namespace = element.namespace.as_deref().unwrap_or_default();
        let module = self.schema.module_by_namespace(namespace).ok_or_else(|| {
            NetconfError::Transform(format!(
                "no module in schema context for namespace '{namespace}'"
            ))
        })?;
        Ok(format!("{}:{}", module.name, element.name))
    }

    fn content_to_json(&self, element: &Element) -> Result<Value> {
        if element.children.is_empty() {
            return Ok(match &element.text {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            });
        }
        self.children_to_json(element, element.namespace.as_deref())
    }

    fn children_to_json(&self, element: &Element, parent_ns: Option<&str>) -> Result<Value> {
        let mut map = Map::new();
        for child in &element.children {
            let key = self.qualified_key(child, parent_ns)?;
            let value = self.content_to_json(child)?;
            match map.get_mut(&key) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModuleInfo;
    use crate::xml;

    const NS: &str = "urn:example:1";

    fn transformer() -> MessageTransformer {
        MessageTransformer::new(SchemaContext::new([
            ModuleInfo::new("example-1", Some("2014-01-08"), NS),
            ModuleInfo::new("ext", None, "urn:ext"),
        ]))
    }

    #[test]
    fn test_to_notification() {
        let msg = xml::parse_message(&format!(
            r#"<notification xmlns="{NETCONF_NOTIFICATION_NS}">
                 <eventTime>2014-01-08T10:00:00Z</eventTime>
                 <greeting xmlns="{NS}"><author>Obi</author><message>Hello there!</message></greeting>
               </notification>"#
        ))
        .unwrap();

        let notification = transformer().to_notification(&msg).unwrap();
        assert_eq!(notification.name.local_name, "greeting");
        assert_eq!(notification.name.revision.as_deref(), Some("2014-01-08"));
        assert_eq!(notification.event_time.as_deref(), Some("2014-01-08T10:00:00Z"));
        assert_eq!(notification.body["example-1:greeting"]["author"], "Obi");
        assert_eq!(notification.body["example-1:greeting"]["message"], "Hello there!");
    }

    #[test]
    fn test_notification_outside_schema() {
        let msg = NetconfMessage::new(
            Element::new(NETCONF_NOTIFICATION_NS, "notification")
                .with_child(Element::new("urn:unknown", "event")),
        );
        assert!(matches!(
            transformer().to_notification(&msg),
            Err(NetconfError::Transform(_))
        ));
    }

    #[test]
    fn test_data_to_json_lists_and_augments() {
        let data = Element::new("urn:ietf:params:xml:ns:netconf:base:1.0", "data").with_child(
            Element::new(NS, "top")
                .with_child(Element::new(NS, "item").with_child(Element::leaf(NS, "id", "1")))
                .with_child(Element::new(NS, "item").with_child(Element::leaf(NS, "id", "2")))
                .with_child(Element::leaf("urn:ext", "flag", "on")),
        );

        let json = transformer().data_to_json(&data).unwrap();
        let top = &json["example-1:top"];
        assert_eq!(top["item"].as_array().unwrap().len(), 2);
        assert_eq!(top["item"][1]["id"], "2");
        assert_eq!(top["ext:flag"], "on");
    }

    #[test]
    fn test_json_to_elements() {
        let payload = serde_json::json!({
            "mtu": 1500,
            "enabled": true,
            "address": [{"ip": "10.0.0.1"}, {"ip": "10.0.0.2"}],
            "ext:flag": "on"
        });

        let elements = transformer().json_to_elements(NS, &payload).unwrap();
        let mtu = elements.iter().find(|e| e.name == "mtu").unwrap();
        assert_eq!(mtu.text.as_deref(), Some("1500"));
        assert_eq!(elements.iter().filter(|e| e.name == "address").count(), 2);
        let flag = elements.iter().find(|e| e.name == "flag").unwrap();
        assert_eq!(flag.namespace.as_deref(), Some("urn:ext"));

        assert!(transformer().json_to_elements(NS, &Value::from(3)).is_err());
    }
}
