//! Notification buffering and forwarding
//!
//! Until the schema context of a session is ready, inbound notifications are
//! queued in arrival order. Schema readiness drains the queue into the sink
//! and switches the handler to live forwarding. Both paths run under the
//! same lock, so a live notification can never overtake a queued one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::DeviceId;
use crate::message::NetconfMessage;
use crate::transform::{MessageTransformer, Notification};

/// Receives transformed notifications, one at a time and in order
///
/// Called while the handler holds its queue lock. Implementations may read
/// session state but must not call back into the same handler.
pub trait NotificationSink: Send + Sync {
    fn on_notification(&self, notification: Notification);
}

/// Predicate run on each transformed notification; `false` drops it
pub type NotificationFilter = Box<dyn Fn(&Notification) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    queue: VecDeque<NetconfMessage>,
    transformer: Option<MessageTransformer>,
    filters: Vec<NotificationFilter>,
    /// Bumped on every reset
    epoch: u64,
}

/// Per-session notification handler
pub struct NotificationHandler {
    device: DeviceId,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<State>,
}

impl std::fmt::Debug for NotificationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHandler")
            .field("device", &self.device)
            .field("queued", &self.queued_len())
            .finish_non_exhaustive()
    }
}

impl NotificationHandler {
    pub fn new(device: DeviceId, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            device,
            sink,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(device = %self.device, "notification handler lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Accept one inbound notification
    pub fn handle(&self, message: NetconfMessage) {
        let mut state = self.lock();
        if state.transformer.is_none() {
            tracing::trace!(device = %self.device, queued = state.queue.len() + 1, "buffering notification");
            state.queue.push_back(message);
            return;
        }
        self.forward(&state, &message);
    }

    /// Replay queued notifications in FIFO order and switch to live forwarding
    pub fn on_schema_ready(&self, transformer: MessageTransformer) {
        let mut state = self.lock();
        self.start_forwarding(&mut state, transformer, Vec::new());
    }

    /// Current reset count, see [`on_schema_ready_in`](Self::on_schema_ready_in)
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Install `filters` and start forwarding, unless the handler was reset since `epoch`
    ///
    /// Returns `false` when the call was stale and ignored.
    pub fn on_schema_ready_in(
        &self,
        epoch: u64,
        transformer: MessageTransformer,
        filters: Vec<NotificationFilter>,
    ) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!(device = %self.device, "ignoring schema of a previous session");
            return false;
        }
        self.start_forwarding(&mut state, transformer, filters);
        true
    }

    fn start_forwarding(
        &self,
        state: &mut State,
        transformer: MessageTransformer,
        filters: Vec<NotificationFilter>,
    ) {
        state.transformer = Some(transformer);
        state.filters.extend(filters);

        let queued = std::mem::take(&mut state.queue);
        if !queued.is_empty() {
            tracing::debug!(device = %self.device, count = queued.len(), "draining buffered notifications");
        }
        for message in &queued {
            self.forward(state, message);
        }
    }

    /// Drop queued notifications and revert to buffering
    pub fn on_session_down(&self) {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.transformer = None;
        state.filters.clear();
        state.epoch += 1;
        if dropped > 0 {
            tracing::debug!(device = %self.device, dropped, "discarded buffered notifications");
        }
    }

    /// Install a filter; filters are removed on session down
    pub fn add_filter(&self, filter: NotificationFilter) {
        self.lock().filters.push(filter);
    }

    /// Number of buffered notifications
    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_forwarding(&self) -> bool {
        self.lock().transformer.is_some()
    }

    fn forward(&self, state: &State, message: &NetconfMessage) {
        let Some(transformer) = &state.transformer else {
            return;
        };
        let notification = match transformer.to_notification(message) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(device = %self.device, error = %e, "failed to transform notification, skipping");
                return;
            }
        };
        if state.filters.iter().all(|filter| filter(&notification)) {
            self.sink.on_notification(notification);
        } else {
            tracing::debug!(device = %self.device, name = %notification.name, "notification filtered");
        }
    }
}
