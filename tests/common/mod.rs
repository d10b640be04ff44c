//! Shared test utilities: a scripted device behind an in-memory transport
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netconf_device::message::{
    CANDIDATE_CAPABILITY, NETCONF_BASE_NS, NETCONF_MONITORING_NS, NETCONF_NOTIFICATION_NS,
    ROLLBACK_ON_ERROR_CAPABILITY,
};
use netconf_device::schema::ModuleInfo;
use netconf_device::{
    Connection, Connector, DeviceId, DeviceSession, DeviceStatus, Element, NetconfError,
    NetconfMessage, Notification, NotificationSink, OperationalStateSink, ParseError, Result,
    SchemaContext, SchemaParser, SchemaSource, SchemaSourceCache, SchemaSourceResolver,
    SessionConfig, SessionState, Transport, TransportEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const A_NS: &str = "urn:example:a";
pub const B_NS: &str = "urn:example:b";

pub const MODULE_A: &str = "urn:example:a?module=a&revision=2020-01-01";
pub const MODULE_B: &str = "urn:example:b?module=b&revision=2020-01-01";
/// Advertised but never served
pub const MODULE_C: &str = "urn:example:c?module=c";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn device_id() -> DeviceId {
    DeviceId::new("test-device", "127.0.0.1:830".parse().unwrap())
}

/// Base capabilities plus the given module capabilities
pub fn capabilities(candidate: bool, modules: &[&str]) -> Vec<String> {
    let mut caps = vec![
        "urn:ietf:params:netconf:base:1.0".to_string(),
        NETCONF_MONITORING_NS.to_string(),
        ROLLBACK_ON_ERROR_CAPABILITY.to_string(),
    ];
    if candidate {
        caps.push(CANDIDATE_CAPABILITY.to_string());
    }
    caps.extend(modules.iter().map(|m| m.to_string()));
    caps
}

/// Builds one module per source; the source text is the module namespace
pub struct NamespaceParser;

impl SchemaParser for NamespaceParser {
    fn parse(&self, sources: &[SchemaSource]) -> std::result::Result<SchemaContext, ParseError> {
        Ok(SchemaContext::new(sources.iter().map(|s| {
            ModuleInfo::new(&s.id.name, s.id.revision.as_deref(), s.text.trim())
        })))
    }
}

pub struct FailingParser;

impl SchemaParser for FailingParser {
    fn parse(&self, _: &[SchemaSource]) -> std::result::Result<SchemaContext, ParseError> {
        Err(ParseError::fatal("cannot parse anything"))
    }
}

#[derive(Default)]
pub struct CollectedNotifications(pub Mutex<Vec<String>>);

impl CollectedNotifications {
    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl NotificationSink for CollectedNotifications {
    fn on_notification(&self, notification: Notification) {
        self.0.lock().unwrap().push(notification.name.local_name);
    }
}

#[derive(Default)]
pub struct CollectedStatuses(pub Mutex<Vec<DeviceStatus>>);

impl CollectedStatuses {
    pub fn all(&self) -> Vec<DeviceStatus> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<DeviceStatus> {
        self.0.lock().unwrap().last().cloned()
    }
}

impl OperationalStateSink for CollectedStatuses {
    fn publish(&self, status: DeviceStatus) {
        self.0.lock().unwrap().push(status);
    }
}

pub struct Fixture {
    pub session: DeviceSession,
    pub notifications: Arc<CollectedNotifications>,
    pub statuses: Arc<CollectedStatuses>,
    pub cache: Arc<SchemaSourceCache>,
}

pub fn fixture(config: SessionConfig, parser: Arc<dyn SchemaParser>) -> Fixture {
    init_tracing();
    let cache = Arc::new(SchemaSourceCache::new());
    let notifications = Arc::new(CollectedNotifications::default());
    let statuses = Arc::new(CollectedStatuses::default());
    let session = DeviceSession::new(
        device_id(),
        config,
        SchemaSourceResolver::new(cache.clone(), parser),
        notifications.clone(),
        statuses.clone(),
    );
    Fixture {
        session,
        notifications,
        statuses,
        cache,
    }
}

/// Outbound half handed to the session
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<NetconfMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send_message(&self, message: NetconfMessage) -> Result<()> {
        if self.is_closed() {
            return Err(NetconfError::Transport("transport closed".into()));
        }
        self.outbound
            .send(message)
            .map_err(|_| NetconfError::Transport("device gone".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed("closed locally".into()));
        }
    }
}

/// Both ends of one in-memory session
pub struct Link {
    pub transport: Arc<MockTransport>,
    pub outbound: mpsc::UnboundedReceiver<NetconfMessage>,
    pub events_tx: mpsc::UnboundedSender<TransportEvent>,
    pub events_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

pub fn link() -> Link {
    let (outbound_tx, outbound) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        outbound: outbound_tx,
        events: events_tx.clone(),
        closed: AtomicBool::new(false),
    });
    Link {
        transport,
        outbound,
        events_tx,
        events_rx,
    }
}

/// A scripted NETCONF server
#[derive(Clone, Default)]
pub struct MockDevice {
    schemas: Arc<HashMap<String, String>>,
    /// Deepest edited node names whose edit-config is rejected
    reject_edits: Arc<HashSet<String>>,
    /// Operations never answered
    silent: Arc<HashSet<String>>,
    data: Option<Element>,
    requests: Arc<Mutex<Vec<NetconfMessage>>>,
}

impl MockDevice {
    /// Serves the sources of modules a and b
    pub fn new() -> Self {
        Self::default()
            .with_schema("a", A_NS)
            .with_schema("b", B_NS)
    }

    pub fn with_schema(mut self, module: &str, text: &str) -> Self {
        Arc::make_mut(&mut self.schemas).insert(module.to_string(), text.to_string());
        self
    }

    pub fn rejecting_edit_of(mut self, node: &str) -> Self {
        Arc::make_mut(&mut self.reject_edits).insert(node.to_string());
        self
    }

    pub fn silent_on(mut self, operation: &str) -> Self {
        Arc::make_mut(&mut self.silent).insert(operation.to_string());
        self
    }

    pub fn with_data(mut self, data: Element) -> Self {
        self.data = Some(data);
        self
    }

    pub fn requests(&self) -> Vec<NetconfMessage> {
        self.requests.lock().unwrap().clone()
    }

    /// Operation names in request order
    pub fn operations(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.root().children.first().map(|op| op.name.clone()))
            .collect()
    }

    /// Identifiers of every get-schema request
    pub fn schema_requests(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.root().child("get-schema"))
            .filter_map(|op| op.child_text("identifier").map(str::to_string))
            .collect()
    }

    /// (node, operation attribute) of every edit-config, for paths `/a:top/<node>`
    pub fn edits(&self) -> Vec<(String, Option<String>)> {
        self.requests()
            .iter()
            .filter_map(|r| r.root().child("edit-config"))
            .filter_map(edited_node)
            .map(|node| (node.name.clone(), node.attribute("operation").map(str::to_string)))
            .collect()
    }

    fn respond(&self, request: &NetconfMessage) -> Option<NetconfMessage> {
        let op = request.root().children.first()?;
        if self.silent.contains(&op.name) {
            return None;
        }

        let content = match op.name.as_str() {
            "get-schema" => {
                let identifier = op.child_text("identifier").unwrap_or_default();
                match self.schemas.get(identifier) {
                    Some(text) => Element::leaf(NETCONF_MONITORING_NS, "data", text.clone()),
                    None => rpc_error("invalid-value", "no such schema"),
                }
            }
            "edit-config" => match edited_node(op) {
                Some(node) if self.reject_edits.contains(&node.name) => {
                    rpc_error("operation-failed", "edit rejected")
                }
                _ => ok(),
            },
            "get" | "get-config" => self
                .data
                .clone()
                .unwrap_or_else(|| Element::new(NETCONF_BASE_NS, "data")),
            _ => ok(),
        };
        Some(reply_to(request, content))
    }

    /// Answer every request arriving on `outbound` through `deliver`
    pub fn serve<F>(&self, mut outbound: mpsc::UnboundedReceiver<NetconfMessage>, deliver: F) -> JoinHandle<()>
    where
        F: Fn(NetconfMessage) + Send + 'static,
    {
        let device = self.clone();
        tokio::spawn(async move {
            while let Some(request) = outbound.recv().await {
                device.requests.lock().unwrap().push(request.clone());
                if let Some(reply) = device.respond(&request) {
                    deliver(reply);
                }
            }
        })
    }
}

fn edited_node(edit_config: &Element) -> Option<&Element> {
    edit_config
        .child("config")?
        .child("top")?
        .children
        .first()
}

pub fn ok() -> Element {
    Element::new(NETCONF_BASE_NS, "ok")
}

pub fn rpc_error(tag: &str, message: &str) -> Element {
    Element::new(NETCONF_BASE_NS, "rpc-error")
        .with_child(Element::leaf(NETCONF_BASE_NS, "error-type", "application"))
        .with_child(Element::leaf(NETCONF_BASE_NS, "error-tag", tag))
        .with_child(Element::leaf(NETCONF_BASE_NS, "error-severity", "error"))
        .with_child(Element::leaf(NETCONF_BASE_NS, "error-message", message))
}

pub fn reply_to(request: &NetconfMessage, content: Element) -> NetconfMessage {
    NetconfMessage::new(
        Element::new(NETCONF_BASE_NS, "rpc-reply")
            .with_attribute("message-id", request.message_id().unwrap_or_default())
            .with_child(content),
    )
}

/// A notification whose content node lives in module a
pub fn notification(name: &str) -> NetconfMessage {
    NetconfMessage::new(
        Element::new(NETCONF_NOTIFICATION_NS, "notification")
            .with_child(Element::leaf(
                NETCONF_NOTIFICATION_NS,
                "eventTime",
                "2020-01-01T00:00:00Z",
            ))
            .with_child(Element::new(A_NS, name)),
    )
}

/// Connect `session` to `device` without a run loop; replies go straight to `on_message`
pub fn bring_up(session: &DeviceSession, device: &MockDevice, caps: &[String]) -> Arc<MockTransport> {
    let Link {
        transport,
        outbound,
        ..
    } = link();
    session.on_connecting();
    session.on_session_up(transport.clone(), caps);
    let target = session.clone();
    device.serve(outbound, move |reply| target.on_message(reply));
    transport
}

/// Poll until `condition` holds, failing after a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_ready(session: &DeviceSession) {
    wait_until(|| session.state() == SessionState::Ready).await;
}

/// Hands out prepared connections in order, refusing once they run out
#[derive(Default)]
pub struct ScriptedConnector {
    connections: Mutex<VecDeque<Connection>>,
    pub attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn push(&self, connection: Connection) {
        self.connections.lock().unwrap().push_back(connection);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _device: &DeviceId) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NetconfError::Transport("connection refused".into()))
    }
}

/// Prepare a connection served by `device`; returns the transport and the event sender
pub fn scripted_connection(
    device: &MockDevice,
    caps: Vec<String>,
) -> (Connection, Arc<MockTransport>, mpsc::UnboundedSender<TransportEvent>) {
    let Link {
        transport,
        outbound,
        events_tx,
        events_rx,
    } = link();
    let replies = events_tx.clone();
    device.serve(outbound, move |reply| {
        let _ = replies.send(TransportEvent::Message(reply));
    });
    let connection = Connection {
        transport: transport.clone(),
        capabilities: caps,
        events: events_rx,
    };
    (connection, transport, events_tx)
}
