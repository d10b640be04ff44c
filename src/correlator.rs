//! Request/reply correlation
//!
//! Every outgoing RPC gets the next decimal `message-id` of the session and a
//! pending entry holding a write-once result slot. Inbound `rpc-reply`
//! messages resolve and remove the matching entry. When the session drops,
//! every entry still pending fails with [`NetconfError::SessionClosed`].
//! Each entry also carries a deadline fixed at send time; a timer task fails
//! it with [`NetconfError::Timeout`] whether or not anyone awaits the reply.
//!
//! The pending table lock is never held across a transport call or a
//! result delivery.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::device::DeviceId;
use crate::error::{ErrorSeverity, ErrorType, NetconfError, Result, RpcError};
use crate::message::{Element, NetconfMessage};
use crate::qname::QName;
use crate::transport::Transport;
use crate::xml;

type ReplySlot = oneshot::Sender<Result<RpcReply>>;

struct PendingRequest {
    rpc: QName,
    tx: ReplySlot,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn resolve(self, result: Result<RpcReply>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        let _ = self.tx.send(result);
    }
}

#[derive(Default)]
struct State {
    transport: Option<Arc<dyn Transport>>,
    next_id: u64,
    /// Bumped on every attach/detach so stale handles never touch a newer session's entries
    epoch: u64,
    pending: HashMap<String, PendingRequest>,
}

struct Inner {
    device: DeviceId,
    default_timeout: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(device = %self.device, "correlator lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Remove an entry of the given epoch and hand it the result
    fn complete(&self, message_id: &str, epoch: u64, result: Result<RpcReply>) {
        let entry = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.pending.remove(message_id)
        };
        if let Some(entry) = entry {
            entry.resolve(result);
        }
    }

    /// Fail an entry whose deadline passed
    fn expire(&self, message_id: &str, epoch: u64, after: Duration) {
        let entry = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.pending.remove(message_id)
        };
        if let Some(entry) = entry {
            tracing::warn!(
                device = %self.device,
                %message_id,
                rpc = %entry.rpc,
                ?after,
                "request timed out"
            );
            entry.resolve(Err(NetconfError::Timeout {
                message_id: message_id.to_string(),
                after,
            }));
        }
    }

    /// Drop bookkeeping for a request nobody waits on anymore
    fn forget(&self, message_id: &str, epoch: u64) -> bool {
        let entry = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return false;
            }
            state.pending.remove(message_id)
        };
        match entry {
            Some(PendingRequest { timer, .. }) => {
                if let Some(timer) = timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }
}

/// Correlates RPC requests with their replies for one device session
///
/// Cloning is cheap; all clones share the same pending table.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("device", &self.inner.device)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RequestCorrelator {
    /// Create a detached correlator; requests fail with `NotConnected` until [`attach`](Self::attach)
    pub fn new(device: DeviceId, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                default_timeout,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.inner.device
    }

    /// Bind a new transport session; the message-id counter restarts
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        let mut state = self.inner.lock();
        state.transport = Some(transport);
        state.next_id = 0;
        state.epoch += 1;
    }

    /// Unbind the transport and fail every pending request
    ///
    /// Returns the number of requests that were failed.
    pub fn detach(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut state = self.inner.lock();
            state.transport = None;
            state.epoch += 1;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (message_id, entry) in drained {
            tracing::debug!(
                device = %self.inner.device,
                %message_id,
                rpc = %entry.rpc,
                "failing pending request, session closed"
            );
            entry.resolve(Err(NetconfError::SessionClosed(reason.to_string())));
        }
        count
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().transport.is_some()
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Send an RPC using the default timeout
    pub fn send(&self, rpc: &QName, body: Element) -> PendingReply {
        self.send_with_timeout(rpc, body, self.inner.default_timeout)
    }

    /// Send an RPC and return a handle to its reply without waiting
    ///
    /// The timeout runs from this call on.
    pub fn send_with_timeout(&self, rpc: &QName, body: Element, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let assigned = {
            let mut state = self.inner.lock();
            match state.transport.clone() {
                Some(transport) => {
                    state.next_id += 1;
                    let message_id = state.next_id.to_string();
                    state.pending.insert(
                        message_id.clone(),
                        PendingRequest {
                            rpc: rpc.clone(),
                            tx,
                            timer: None,
                        },
                    );
                    Ok((transport, message_id, state.epoch))
                }
                None => Err(tx),
            }
        };

        let (transport, message_id, epoch) = match assigned {
            Ok(assigned) => assigned,
            Err(tx) => {
                tracing::debug!(device = %self.inner.device, rpc = %rpc, "no session, failing request");
                let _ = tx.send(Err(NetconfError::NotConnected));
                return PendingReply {
                    message_id: None,
                    rx: Some(rx),
                    timeout,
                    deadline,
                    epoch: 0,
                    inner: self.inner.clone(),
                };
            }
        };

        tracing::trace!(device = %self.inner.device, %message_id, rpc = %rpc, "sending rpc");
        if let Err(e) = transport.send_message(NetconfMessage::rpc(&message_id, body)) {
            tracing::warn!(
                device = %self.inner.device,
                %message_id,
                error = %e,
                "failed to send rpc"
            );
            let err = match e {
                NetconfError::Transport(_) => e,
                other => NetconfError::Transport(other.to_string()),
            };
            self.inner.complete(&message_id, epoch, Err(err));
        } else {
            self.arm_timer(&message_id, epoch, deadline, timeout);
        }

        PendingReply {
            message_id: Some(message_id),
            rx: Some(rx),
            timeout,
            deadline,
            epoch,
            inner: self.inner.clone(),
        }
    }

    /// Spawn the task failing `message_id` at `deadline`
    ///
    /// Outside a runtime only an awaiting [`PendingReply`] enforces the deadline.
    fn arm_timer(&self, message_id: &str, epoch: u64, deadline: Instant, timeout: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = message_id.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(&id, epoch, timeout);
            }
        });

        let mut state = self.inner.lock();
        if state.epoch != epoch {
            task.abort();
            return;
        }
        match state.pending.get_mut(message_id) {
            Some(entry) => entry.timer = Some(task.abort_handle()),
            // already answered
            None => task.abort(),
        }
    }

    /// Send an RPC and wait for a successful reply
    pub async fn invoke(&self, rpc: &QName, body: Element) -> Result<RpcReply> {
        self.send(rpc, body).response().await?.into_result()
    }

    /// Route an inbound `rpc-reply` to its pending request
    pub fn on_reply(&self, message: NetconfMessage) {
        let Some(actual) = message.message_id().map(str::to_string) else {
            tracing::warn!(device = %self.inner.device, "discarding reply without message-id");
            return;
        };

        let mut state = self.inner.lock();
        if let Some(entry) = state.pending.remove(&actual) {
            drop(state);
            tracing::trace!(device = %self.inner.device, message_id = %actual, "reply received");
            let reply = RpcReply::new(actual, message.into_root());
            entry.resolve(Ok(reply));
            return;
        }

        // "07" for request "7": same request, wrong identifier
        let expected = actual.trim().parse::<u64>().ok().and_then(|n| {
            state
                .pending
                .keys()
                .find(|k| k.parse::<u64>().ok() == Some(n))
                .cloned()
        });
        let entry = expected
            .as_ref()
            .and_then(|expected| state.pending.remove(expected));
        drop(state);

        match (expected, entry) {
            (Some(expected), Some(entry)) => {
                tracing::warn!(
                    device = %self.inner.device,
                    %expected,
                    %actual,
                    "reply message-id does not match request"
                );
                entry.resolve(Err(NetconfError::MessageIdMismatch { expected, actual }));
            }
            _ => {
                tracing::warn!(
                    device = %self.inner.device,
                    message_id = %actual,
                    "discarding reply with no matching request"
                );
            }
        }
    }
}

/// Handle to the reply of one request
///
/// Dropping the handle before the reply arrives removes the pending entry;
/// the request itself is not recalled from the device.
pub struct PendingReply {
    message_id: Option<String>,
    rx: Option<oneshot::Receiver<Result<RpcReply>>>,
    timeout: Duration,
    /// Fixed when the request was sent
    deadline: Instant,
    epoch: u64,
    inner: Arc<Inner>,
}

impl PendingReply {
    /// Identifier assigned to the request; `None` when it was never sent
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Wait for the reply or the request timeout
    pub async fn response(mut self) -> Result<RpcReply> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(NetconfError::SessionClosed("reply already consumed".into()));
        };
        let outcome = tokio::time::timeout_at(self.deadline, rx).await;
        self.rx = None;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetconfError::SessionClosed("reply slot dropped".into())),
            Err(_) => {
                let message_id = self.message_id.clone().unwrap_or_default();
                if self.inner.forget(&message_id, self.epoch) {
                    tracing::warn!(
                        device = %self.inner.device,
                        %message_id,
                        after = ?self.timeout,
                        "request timed out"
                    );
                }
                Err(NetconfError::Timeout {
                    message_id,
                    after: self.timeout,
                })
            }
        }
    }

    /// Stop waiting for the reply
    pub fn cancel(self) {
        if let Some(id) = &self.message_id {
            tracing::debug!(device = %self.inner.device, message_id = %id, "request cancelled");
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.rx.is_some()
            && let Some(id) = &self.message_id
        {
            self.inner.forget(id, self.epoch);
        }
    }
}

impl IntoFuture for PendingReply {
    type Output = Result<RpcReply>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<RpcReply>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.response())
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("message_id", &self.message_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An `rpc-reply` matched to its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    message_id: String,
    root: Element,
}

impl RpcReply {
    pub fn new(message_id: impl Into<String>, root: Element) -> Self {
        Self {
            message_id: message_id.into(),
            root,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The `rpc-reply` element
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// `true` when the reply carries `<ok/>`
    pub fn is_ok(&self) -> bool {
        self.root.child("ok").is_some()
    }

    /// The `data` child of a retrieval reply
    pub fn data(&self) -> Option<&Element> {
        self.root.child("data")
    }

    /// Decode every `rpc-error` child
    pub fn errors(&self) -> Vec<RpcError> {
        self.root.children_named("rpc-error").map(parse_rpc_error).collect()
    }

    /// `true` unless an `rpc-error` of severity error is present
    pub fn is_success(&self) -> bool {
        self.errors()
            .iter()
            .all(|e| e.severity != ErrorSeverity::Error)
    }

    /// Turn error replies into [`NetconfError::Rpc`]
    pub fn into_result(self) -> Result<Self> {
        let errors = self.errors();
        if errors.iter().any(|e| e.severity == ErrorSeverity::Error) {
            return Err(NetconfError::Rpc(errors));
        }
        Ok(self)
    }
}

fn parse_rpc_error(element: &Element) -> RpcError {
    let severity = match element.child_text("error-severity") {
        Some("warning") => ErrorSeverity::Warning,
        _ => ErrorSeverity::Error,
    };

    let info = element.child("error-info").and_then(|info| {
        let rendered: Vec<String> = info
            .children
            .iter()
            .filter_map(|c| xml::to_string(c).ok())
            .collect();
        match (rendered.is_empty(), &info.text) {
            (false, _) => Some(rendered.concat()),
            (true, Some(text)) => Some(text.clone()),
            (true, None) => None,
        }
    });

    RpcError {
        error_type: ErrorType::from_xml(element.child_text("error-type").unwrap_or_default()),
        tag: element
            .child_text("error-tag")
            .unwrap_or("operation-failed")
            .to_string(),
        severity,
        message: element.child_text("error-message").map(|m| m.trim().to_string()),
        info,
    }
}
