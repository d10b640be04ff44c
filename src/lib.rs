//! netconf-device - NETCONF device session layer
//!
//! This library keeps a persistent session to a NETCONF device: it negotiates
//! capabilities, resolves the YANG schemas the device advertises, correlates
//! RPC requests with their replies, buffers notifications until the schema is
//! ready and writes configuration through edit-config/commit transactions.
//!
//! The wire (SSH/TLS framing) and the YANG parser are supplied by the caller
//! through the [`Connector`], [`Transport`] and [`SchemaParser`] traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use netconf_device::{
//!     DeviceId, DeviceSession, Modification, ModificationSet, SchemaSourceCache,
//!     SchemaSourceResolver, SessionConfig, TimedReconnectStrategy,
//! };
//! # use netconf_device::{Connector, NotificationSink, OperationalStateSink, SchemaParser};
//! # async fn example(
//! #     connector: Arc<dyn Connector>,
//! #     parser: Arc<dyn SchemaParser>,
//! #     notifications: Arc<dyn NotificationSink>,
//! #     status: Arc<dyn OperationalStateSink>,
//! # ) -> netconf_device::Result<()> {
//!
//! let config = SessionConfig::from_file("device.toml")?;
//! let cache = match &config.schema_cache_dir {
//!     Some(dir) => SchemaSourceCache::with_directory(dir)?,
//!     None => SchemaSourceCache::new(),
//! };
//! let resolver = SchemaSourceResolver::new(Arc::new(cache), parser);
//! let device = DeviceId::new("r1", ([192, 0, 2, 1], 830).into());
//! let session = DeviceSession::new(device, config.clone(), resolver, notifications, status);
//!
//! // Drive connect/reconnect in the background
//! let runner = session.clone();
//! tokio::spawn(async move {
//!     runner.run(connector.as_ref(), TimedReconnectStrategy::from_config(&config)).await
//! });
//!
//! // Once ready, write configuration
//! let tx = session.new_transaction()?;
//! let mut edits = ModificationSet::new();
//! edits.push(Modification::remove(session.parse_path("/ietf-interfaces:interfaces/interface[name='eth1']")?));
//! tx.prepare(&edits).await?;
//! tx.finish().await?;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod commit;
pub mod config;
pub mod correlator;
pub mod device;
mod error;
pub mod instance_id;
pub mod message;
pub mod notification;
pub mod qname;
pub mod reconnect;
pub mod request_builder;
pub mod schema;
pub mod session;
pub mod transform;
pub mod transport;
pub mod xml;

pub use capability::{Capability, SessionPreferences};
pub use commit::{EditAction, EditOrdering, Modification, ModificationSet, TwoPhaseConfigCommit};
pub use config::SessionConfig;
pub use correlator::{PendingReply, RequestCorrelator, RpcReply};
pub use device::{DeviceId, DeviceStatus, OperationalStateSink, SessionState};
pub use error::{ErrorSeverity, ErrorType, NetconfError, Result, RpcError};
pub use instance_id::{PathArgument, YangPath};
pub use message::{Element, MessageKind, NetconfMessage};
pub use notification::{NotificationHandler, NotificationSink};
pub use qname::QName;
pub use reconnect::{ReconnectStrategy, TimedReconnectStrategy};
pub use schema::{
    ParseError, SchemaContext, SchemaParser, SchemaSource, SchemaSourceCache,
    SchemaSourceResolver, SourceIdentifier,
};
pub use session::DeviceSession;
pub use transform::{MessageTransformer, Notification};
pub use transport::{Connection, Connector, Transport, TransportEvent};
