//! Device identity, session state and the operational-state sink

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use crate::capability::Capability;
use crate::schema::UnavailableCapability;

/// Immutable name/address pair identifying one managed device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    name: String,
    address: SocketAddr,
}

impl DeviceId {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteDevice{{{}}}", self.name)
    }
}

/// Lifecycle state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    CapabilitiesExchanged,
    SchemaResolving,
    Ready,
    TearingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::CapabilitiesExchanged => "capabilities-exchanged",
            Self::SchemaResolving => "schema-resolving",
            Self::Ready => "ready",
            Self::TearingDown => "tearing-down",
        };
        f.write_str(name)
    }
}

/// Externally observable device state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device: DeviceId,
    pub connected: bool,
    /// Every capability string from the hello, module or not
    pub advertised: BTreeSet<String>,
    /// Module capabilities backed by the schema context; a subset of `advertised`
    pub capabilities: BTreeSet<Capability>,
    /// Capabilities advertised but left out of the schema context
    pub unavailable: Vec<UnavailableCapability>,
}

impl DeviceStatus {
    /// Status published on Disconnected-entry
    pub fn disconnected(device: DeviceId) -> Self {
        Self {
            device,
            connected: false,
            advertised: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            unavailable: Vec::new(),
        }
    }
}

/// Receives device status upserts on every Ready-entry and Disconnected-entry
///
/// Statuses of one device arrive in transition order. No session lock is held
/// during `publish`, so implementations may read the session, but must not
/// drive its transitions from inside the call.
pub trait OperationalStateSink: Send + Sync {
    fn publish(&self, status: DeviceStatus);
}
