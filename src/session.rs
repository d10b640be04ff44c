//! Device session state machine
//!
//! A [`DeviceSession`] owns everything scoped to one device connection: the
//! request correlator, the notification handler, the negotiated preferences
//! and the schema context. It is driven either by [`DeviceSession::run`]
//! with a [`Connector`] or manually through the `on_*` callbacks.
//!
//! ```text
//! Disconnected -> Connecting -> CapabilitiesExchanged -> SchemaResolving -> Ready
//!       ^                                                                     |
//!       +------------------------------ TearingDown <-------------------------+
//! ```
//!
//! Schema resolution runs on a spawned task, never on the delivery path.
//! Session-up and teardown are serialized by a lifecycle lock. User sinks
//! are never called with the state or lifecycle lock held; device status goes
//! out under a separate publish lock and only while the session generation it
//! describes is still current, so the sink sees statuses in transition order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capability::SessionPreferences;
use crate::commit::TwoPhaseConfigCommit;
use crate::config::SessionConfig;
use crate::correlator::{RequestCorrelator, RpcReply};
use crate::device::{DeviceId, DeviceStatus, OperationalStateSink, SessionState};
use crate::error::{NetconfError, Result};
use crate::instance_id::YangPath;
use crate::message::{Element, MessageKind, NetconfMessage, NETCONF_NOTIFICATIONS_NS};
use crate::notification::{NotificationHandler, NotificationSink};
use crate::qname::QName;
use crate::reconnect::ReconnectStrategy;
use crate::request_builder::{self, Datastore, RpcRequest};
use crate::schema::{
    RemoteSchemaProvider, ResolvedSchema, SchemaContext, SchemaSourceResolver,
    UnavailableCapability, UnavailableReason,
};
use crate::transform::{MessageTransformer, Notification};
use crate::transport::{Connection, Connector, Transport, TransportEvent};

fn lock<'a, T>(device: &DeviceId, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(device = %device, "session lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn read<'a, T>(device: &DeviceId, lock: &'a RwLock<T>) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!(device = %device, "session lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<'a, T>(device: &DeviceId, lock: &'a RwLock<T>) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!(device = %device, "session lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

struct Inner {
    id: DeviceId,
    config: SessionConfig,
    state: Mutex<SessionState>,
    /// Held across a whole session-up or teardown
    lifecycle: Mutex<()>,
    /// Orders status publication
    publish: Mutex<()>,
    /// Bumped on every session-up and teardown; stale setup tasks compare against it
    generation: AtomicU64,
    correlator: RequestCorrelator,
    notifications: NotificationHandler,
    resolver: SchemaSourceResolver,
    state_sink: Arc<dyn OperationalStateSink>,
    preferences: RwLock<SessionPreferences>,
    transformer: RwLock<Option<MessageTransformer>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    setup: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// State machine for one managed device
///
/// Cloning is cheap; clones drive the same session.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub fn new(
        id: DeviceId,
        config: SessionConfig,
        resolver: SchemaSourceResolver,
        notification_sink: Arc<dyn NotificationSink>,
        state_sink: Arc<dyn OperationalStateSink>,
    ) -> Self {
        let correlator = RequestCorrelator::new(id.clone(), config.request_timeout());
        let notifications = NotificationHandler::new(id.clone(), notification_sink);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                id,
                config,
                state: Mutex::new(SessionState::Disconnected),
                lifecycle: Mutex::new(()),
                publish: Mutex::new(()),
                generation: AtomicU64::new(0),
                correlator,
                notifications,
                resolver,
                state_sink,
                preferences: RwLock::new(SessionPreferences::default()),
                transformer: RwLock::new(None),
                transport: Mutex::new(None),
                setup: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.id, &self.inner.state)
    }

    /// Schema context of the current session, if one was built
    pub fn schema_context(&self) -> Option<SchemaContext> {
        read(&self.inner.id, &self.inner.transformer)
            .as_ref()
            .map(|t| t.schema().clone())
    }

    /// Preferences negotiated at the last session-up
    pub fn preferences(&self) -> SessionPreferences {
        read(&self.inner.id, &self.inner.preferences).clone()
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.inner.correlator
    }

    pub fn notifications(&self) -> &NotificationHandler {
        &self.inner.notifications
    }

    fn transition(&self, state: &mut SessionState, to: SessionState) {
        tracing::debug!(device = %self.inner.id, from = %*state, to = %to, "session state changed");
        *state = to;
    }

    /// A connection attempt is starting
    pub fn on_connecting(&self) {
        let mut state = lock(&self.inner.id, &self.inner.state);
        if *state != SessionState::Disconnected {
            tracing::warn!(device = %self.inner.id, state = %*state, "connect requested in unexpected state");
            return;
        }
        self.transition(&mut state, SessionState::Connecting);
    }

    /// The transport is up and the hello capabilities are known
    ///
    /// Schema resolution is dispatched to a background task; must be called
    /// from within a tokio runtime.
    pub fn on_session_up<I, S>(&self, transport: Arc<dyn Transport>, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let preferences = SessionPreferences::from_capabilities(capabilities);

        let _lifecycle = loop {
            let guard = lock(&self.inner.id, &self.inner.lifecycle);
            if matches!(
                self.state(),
                SessionState::Disconnected | SessionState::Connecting
            ) {
                break guard;
            }
            drop(guard);
            tracing::warn!(device = %self.inner.id, "session up while a session is active, tearing down the old one");
            self.on_session_down("session replaced");
        };

        tracing::info!(
            device = %self.inner.id,
            modules = preferences.module_capabilities().len(),
            candidate = preferences.is_candidate_supported(),
            monitoring = preferences.is_monitoring_supported(),
            "session up"
        );
        let generation = {
            let mut state = lock(&self.inner.id, &self.inner.state);
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *write(&self.inner.id, &self.inner.preferences) = preferences.clone();
            *lock(&self.inner.id, &self.inner.transport) = Some(transport.clone());
            self.inner.correlator.attach(transport);
            self.transition(&mut state, SessionState::CapabilitiesExchanged);
            self.transition(&mut state, SessionState::SchemaResolving);
            generation
        };
        let epoch = self.inner.notifications.epoch();

        let session = self.clone();
        let handle = tokio::spawn(async move {
            session.setup_schema(generation, epoch, preferences).await;
        });
        if let Some(previous) = lock(&self.inner.id, &self.inner.setup).replace(handle) {
            previous.abort();
        }
    }

    async fn setup_schema(&self, generation: u64, epoch: u64, preferences: SessionPreferences) {
        let remote: Option<&dyn RemoteSchemaProvider> = if preferences.is_monitoring_supported() {
            Some(&self.inner.correlator)
        } else {
            None
        };

        let capabilities = preferences.module_capabilities();
        let resolved = match self
            .inner
            .resolver
            .resolve(&self.inner.id, capabilities, remote)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    device = %self.inner.id,
                    error = %e,
                    "schema setup failed, device available without schema context"
                );
                ResolvedSchema {
                    context: None,
                    resolved: Default::default(),
                    unavailable: capabilities
                        .iter()
                        .map(|c| UnavailableCapability {
                            capability: c.clone(),
                            reason: UnavailableReason::UnableToResolve,
                        })
                        .collect(),
                }
            }
        };

        if self.enter_ready(generation, epoch, &preferences, resolved) {
            self.subscribe_for_schema_changes(&preferences).await;
        }
    }

    /// Returns `false` when the session went away while resolving
    fn enter_ready(
        &self,
        generation: u64,
        epoch: u64,
        preferences: &SessionPreferences,
        resolved: ResolvedSchema,
    ) -> bool {
        let transformer = resolved.context.clone().map(MessageTransformer::new);
        let transport = {
            let mut state = lock(&self.inner.id, &self.inner.state);
            if self.inner.generation.load(Ordering::SeqCst) != generation
                || *state != SessionState::SchemaResolving
            {
                tracing::debug!(device = %self.inner.id, "discarding schema of a stale session");
                return false;
            }
            *write(&self.inner.id, &self.inner.transformer) = transformer.clone();
            self.transition(&mut state, SessionState::Ready);
            lock(&self.inner.id, &self.inner.transport).clone()
        };

        let mut filters = Vec::new();
        if self.schema_change_watch_enabled(preferences)
            && let Some(transport) = transport
        {
            filters.push(capability_change_filter(self.inner.id.clone(), transport));
        }
        // without a context every buffered notification fails to transform and is logged
        let transformer =
            transformer.unwrap_or_else(|| MessageTransformer::new(SchemaContext::new([])));
        if !self
            .inner
            .notifications
            .on_schema_ready_in(epoch, transformer, filters)
        {
            return false;
        }

        tracing::info!(
            device = %self.inner.id,
            available = resolved.resolved.len(),
            unavailable = resolved.unavailable.len(),
            "device ready"
        );
        self.publish_status(
            generation,
            DeviceStatus {
                device: self.inner.id.clone(),
                connected: true,
                advertised: preferences.capabilities().clone(),
                capabilities: resolved.resolved,
                unavailable: resolved.unavailable,
            },
        )
    }

    /// Publish `status` unless a newer transition already happened
    fn publish_status(&self, generation: u64, status: DeviceStatus) -> bool {
        let _publish = lock(&self.inner.id, &self.inner.publish);
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(device = %self.inner.id, connected = status.connected, "skipping outdated status");
            return false;
        }
        self.inner.state_sink.publish(status);
        true
    }

    fn schema_change_watch_enabled(&self, preferences: &SessionPreferences) -> bool {
        self.inner.config.reconnect_on_schema_change && preferences.is_notifications_supported()
    }

    async fn subscribe_for_schema_changes(&self, preferences: &SessionPreferences) {
        if !self.schema_change_watch_enabled(preferences) {
            return;
        }
        let request = request_builder::create_subscription(None);
        match self.inner.correlator.invoke(&request.name, request.body).await {
            Ok(_) => tracing::debug!(device = %self.inner.id, "subscribed to notifications"),
            Err(e) => tracing::warn!(
                device = %self.inner.id,
                error = %e,
                "create-subscription failed, schema changes will go unnoticed"
            ),
        }
    }

    /// Dispatch one inbound message
    pub fn on_message(&self, message: NetconfMessage) {
        match message.kind() {
            MessageKind::Reply => self.inner.correlator.on_reply(message),
            MessageKind::Notification => self.inner.notifications.handle(message),
            MessageKind::Other => {
                tracing::debug!(
                    device = %self.inner.id,
                    element = %message.root().name,
                    "ignoring unexpected message"
                );
            }
        }
    }

    /// The transport went down, or the connection attempt failed
    pub fn on_session_down(&self, reason: &str) {
        let (generation, failed) = {
            let _lifecycle = lock(&self.inner.id, &self.inner.lifecycle);
            let generation = {
                let mut state = lock(&self.inner.id, &self.inner.state);
                if *state == SessionState::Disconnected {
                    return;
                }
                self.transition(&mut state, SessionState::TearingDown);
                self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
            };

            if let Some(setup) = lock(&self.inner.id, &self.inner.setup).take() {
                setup.abort();
            }
            let failed = self.inner.correlator.detach(reason);
            self.inner.notifications.on_session_down();
            *write(&self.inner.id, &self.inner.transformer) = None;
            lock(&self.inner.id, &self.inner.transport).take();

            let mut state = lock(&self.inner.id, &self.inner.state);
            self.transition(&mut state, SessionState::Disconnected);
            (generation, failed)
        };

        tracing::info!(device = %self.inner.id, reason, failed, "session down");
        self.publish_status(generation, DeviceStatus::disconnected(self.inner.id.clone()));
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(NetconfError::NotConnected),
        }
    }

    fn transformer(&self) -> Result<MessageTransformer> {
        read(&self.inner.id, &self.inner.transformer)
            .clone()
            .ok_or(NetconfError::SchemaUnavailable)
    }

    /// Invoke an arbitrary RPC; works without a schema context
    pub async fn invoke_rpc(&self, rpc: &QName, body: Element) -> Result<RpcReply> {
        self.ensure_ready()?;
        self.inner.correlator.invoke(rpc, body).await
    }

    /// Parse a path against the current schema context
    pub fn parse_path(&self, path: &str) -> Result<YangPath> {
        YangPath::parse(path, self.transformer()?.schema())
    }

    /// Read configuration from the running datastore as JSON
    ///
    /// `path` restricts the result with a subtree filter.
    pub async fn get_config(&self, path: Option<&str>) -> Result<Value> {
        let filter = self.filter(path)?;
        self.read_data(request_builder::get_config(Datastore::Running, filter))
            .await
    }

    /// Read configuration and state data as JSON
    pub async fn get(&self, path: Option<&str>) -> Result<Value> {
        let filter = self.filter(path)?;
        self.read_data(request_builder::get(filter)).await
    }

    fn filter(&self, path: Option<&str>) -> Result<Option<Element>> {
        path.map(|p| self.parse_path(p)?.to_filter()).transpose()
    }

    async fn read_data(&self, request: RpcRequest) -> Result<Value> {
        self.ensure_ready()?;
        let transformer = self.transformer()?;
        let reply = self
            .inner
            .correlator
            .invoke(&request.name, request.body)
            .await?;
        match reply.data() {
            Some(data) => transformer.data_to_json(data),
            None => Ok(Value::Object(Default::default())),
        }
    }

    /// Start a write transaction
    pub fn new_transaction(&self) -> Result<TwoPhaseConfigCommit> {
        self.ensure_ready()?;
        let transformer = read(&self.inner.id, &self.inner.transformer).clone();
        Ok(TwoPhaseConfigCommit::new(
            self.inner.id.clone(),
            self.inner.correlator.clone(),
            &self.preferences(),
            transformer,
            self.inner.config.edit_ordering,
        ))
    }

    /// Connect, serve and reconnect until the strategy gives up or [`shutdown`](Self::shutdown)
    pub async fn run<C, R>(&self, connector: &C, mut strategy: R) -> Result<()>
    where
        C: Connector + ?Sized,
        R: ReconnectStrategy,
    {
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            self.on_connecting();
            let connected = tokio::select! {
                result = connector.connect(&self.inner.id) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(Connection {
                    transport,
                    capabilities,
                    mut events,
                }) => {
                    strategy.reset();
                    self.on_session_up(transport.clone(), &capabilities);
                    match self.pump(&mut events, &mut shutdown).await {
                        Some(reason) => self.on_session_down(&reason),
                        None => {
                            transport.close();
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(device = %self.inner.id, error = %e, "connection attempt failed");
                    self.on_session_down(&e.to_string());
                }
            }

            let Some(delay) = strategy.next_delay() else {
                tracing::warn!(device = %self.inner.id, "giving up reconnecting");
                self.on_session_down("reconnect attempts exhausted");
                return Err(NetconfError::Transport(
                    "maximum connection attempts reached".into(),
                ));
            };
            tracing::debug!(device = %self.inner.id, ?delay, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.on_session_down("session shut down");
        Ok(())
    }

    /// Deliver transport events until the session ends; `None` on shutdown
    async fn pump(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Message(message)) => self.on_message(message),
                    Some(TransportEvent::Closed(reason)) => return Some(reason),
                    None => return Some("transport channel closed".into()),
                },
                _ = shutdown.changed() => return None,
            }
        }
    }

    /// Stop the session and any [`run`](Self::run) loop driving it
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let transport = lock(&self.inner.id, &self.inner.transport).clone();
        if let Some(transport) = transport {
            transport.close();
        }
        self.on_session_down("session shut down");
    }
}

/// Closes the session when the device reports a capability change
fn capability_change_filter(
    device: DeviceId,
    transport: Arc<dyn Transport>,
) -> Box<dyn Fn(&Notification) -> bool + Send + Sync> {
    Box::new(move |notification| {
        if notification
            .name
            .matches(NETCONF_NOTIFICATIONS_NS, "netconf-capability-change")
        {
            tracing::warn!(device = %device, "device schema changed, reconnecting");
            transport.close();
            return false;
        }
        true
    })
}
