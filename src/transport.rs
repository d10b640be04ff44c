//! Transport boundary
//!
//! The transport owns the wire. It accepts whole messages through
//! [`Transport::send_message`] and delivers inbound traffic as
//! [`TransportEvent`]s over a channel. One channel per session, read by one
//! task, so messages are processed in the order they came off the wire.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::device::DeviceId;
use crate::error::Result;
use crate::message::NetconfMessage;

/// Outbound half of an established session
pub trait Transport: Send + Sync {
    /// Queue a whole message for transmission; must not block
    fn send_message(&self, message: NetconfMessage) -> Result<()>;

    /// Close the session; the delivery channel reports [`TransportEvent::Closed`] afterwards
    fn close(&self);
}

/// Inbound traffic for one session
#[derive(Debug)]
pub enum TransportEvent {
    /// A whole protocol message
    Message(NetconfMessage),
    /// The session ended; carries the reason
    Closed(String),
}

/// An established session as produced by a [`Connector`]
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    /// Capability strings from the server hello
    pub capabilities: Vec<String>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Opens sessions to a device (SSH/TLS plumbing lives behind this)
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &DeviceId) -> Result<Connection>;
}
