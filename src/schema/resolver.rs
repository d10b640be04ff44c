//! Schema source resolution
//!
//! Sources come from the shared cache first, then from the device itself via
//! `get-schema`. Whatever was obtained goes to the external parser. Sources
//! the parser reports as unusable are removed and parsing is retried, so one
//! broken module never costs the whole context.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{ParseError, SchemaContext, SchemaParser, SchemaSource, SchemaSourceCache, SourceIdentifier};
use crate::capability::Capability;
use crate::correlator::RequestCorrelator;
use crate::device::DeviceId;
use crate::error::{NetconfError, Result};
use crate::message::NETCONF_MONITORING_NS;
use crate::qname::QName;
use crate::request_builder;

/// Fetches schema text from a remote device
#[async_trait]
pub trait RemoteSchemaProvider: Send + Sync {
    /// `Ok(None)` when the device has no such source
    async fn get_schema(&self, id: &SourceIdentifier) -> Result<Option<String>>;
}

#[async_trait]
impl RemoteSchemaProvider for RequestCorrelator {
    async fn get_schema(&self, id: &SourceIdentifier) -> Result<Option<String>> {
        let request = request_builder::get_schema(&id.name, id.revision.as_deref());
        let reply = self.send(&request.name, request.body).response().await?;

        if !reply.is_success() {
            tracing::debug!(
                device = %self.device(),
                source = %id,
                errors = ?reply.errors(),
                "get-schema failed"
            );
            return Ok(None);
        }

        let text = reply
            .root()
            .child_ns(NETCONF_MONITORING_NS, "data")
            .or_else(|| reply.data())
            .and_then(|data| data.text.clone())
            .filter(|text| !text.trim().is_empty());
        Ok(text)
    }
}

/// Why an advertised capability is not part of the schema context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnavailableReason {
    /// No source could be obtained
    MissingSource,
    /// A source was obtained but the parser could not use it
    UnableToResolve,
}

/// An advertised capability left out of the schema context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UnavailableCapability {
    pub capability: Capability,
    pub reason: UnavailableReason,
}

/// Outcome of resolving one capability set
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchema {
    /// `None` when not a single source was obtainable
    pub context: Option<SchemaContext>,
    /// Capabilities whose sources made it into the context
    pub resolved: BTreeSet<Capability>,
    pub unavailable: Vec<UnavailableCapability>,
}

impl ResolvedSchema {
    /// Module QNames available in the context
    pub fn available_module_qnames(&self) -> BTreeSet<QName> {
        self.context
            .as_ref()
            .map(SchemaContext::module_qnames)
            .unwrap_or_default()
    }
}

/// Builds schema contexts from advertised capabilities
#[derive(Clone)]
pub struct SchemaSourceResolver {
    cache: Arc<SchemaSourceCache>,
    parser: Arc<dyn SchemaParser>,
}

impl std::fmt::Debug for SchemaSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSourceResolver")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl SchemaSourceResolver {
    pub fn new(cache: Arc<SchemaSourceCache>, parser: Arc<dyn SchemaParser>) -> Self {
        Self { cache, parser }
    }

    pub fn cache(&self) -> &Arc<SchemaSourceCache> {
        &self.cache
    }

    /// Resolve the sources of `capabilities` and parse them
    ///
    /// `remote` is consulted for sources missing from the cache; pass `None`
    /// when the device does not support ietf-netconf-monitoring.
    pub async fn resolve(
        &self,
        device: &DeviceId,
        capabilities: &BTreeSet<Capability>,
        remote: Option<&dyn RemoteSchemaProvider>,
    ) -> Result<ResolvedSchema> {
        let mut unavailable = Vec::new();
        let mut sources: Vec<(Capability, SchemaSource)> = Vec::new();

        for capability in capabilities {
            match self.obtain(device, capability, remote).await {
                Some(source) => sources.push((capability.clone(), source)),
                None => {
                    tracing::warn!(
                        device = %device,
                        module = %capability.source_id(),
                        "schema source not available, module will be missing"
                    );
                    unavailable.push(UnavailableCapability {
                        capability: capability.clone(),
                        reason: UnavailableReason::MissingSource,
                    });
                }
            }
        }

        if sources.is_empty() {
            tracing::warn!(device = %device, "no schema sources available, proceeding without schema context");
            return Ok(ResolvedSchema {
                context: None,
                resolved: BTreeSet::new(),
                unavailable,
            });
        }

        loop {
            let attempt: Vec<SchemaSource> = sources.iter().map(|(_, s)| s.clone()).collect();
            let parser = self.parser.clone();
            let outcome = tokio::task::spawn_blocking(move || parser.parse(&attempt))
                .await
                .map_err(|e| NetconfError::SchemaResolution(format!("parser task failed: {e}")))?;

            let err = match outcome {
                Ok(context) => {
                    tracing::debug!(
                        device = %device,
                        modules = sources.len(),
                        missing = unavailable.len(),
                        "schema context built"
                    );
                    return Ok(ResolvedSchema {
                        context: Some(context),
                        resolved: sources.into_iter().map(|(c, _)| c).collect(),
                        unavailable,
                    });
                }
                Err(err) => err,
            };

            let before = sources.len();
            strip_unresolved(&err, &mut sources, &mut unavailable);
            if sources.len() == before {
                tracing::warn!(device = %device, error = %err, "schema parsing failed");
                return Err(NetconfError::SchemaResolution(err.message));
            }
            tracing::info!(
                device = %device,
                dropped = before - sources.len(),
                error = %err,
                "retrying schema setup without unresolved sources"
            );
            if sources.is_empty() {
                return Err(NetconfError::SchemaResolution(format!(
                    "every source was unresolvable: {}",
                    err.message
                )));
            }
        }
    }

    async fn obtain(
        &self,
        device: &DeviceId,
        capability: &Capability,
        remote: Option<&dyn RemoteSchemaProvider>,
    ) -> Option<SchemaSource> {
        let id = capability.source_id();
        if let Some(source) = self.cache.get(&id) {
            return Some(source);
        }

        let remote = remote?;
        let text = match remote.get_schema(&id).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(device = %device, source = %id, error = %e, "get-schema request failed");
                return None;
            }
        };

        let source = SchemaSource::new(id, text);
        if let Err(e) = self.cache.insert(&source) {
            tracing::warn!(device = %device, source = %source.id, error = %e, "failed to persist schema source");
        }
        Some(source)
    }
}

/// Move the sources named by the parser error into `unavailable`
fn strip_unresolved(
    err: &ParseError,
    sources: &mut Vec<(Capability, SchemaSource)>,
    unavailable: &mut Vec<UnavailableCapability>,
) {
    sources.retain(|(capability, source)| {
        let unresolved = err.unresolved.iter().any(|id| {
            *id == source.id || (id.name == source.id.name && id.revision.is_none())
        });
        if unresolved {
            unavailable.push(UnavailableCapability {
                capability: capability.clone(),
                reason: UnavailableReason::UnableToResolve,
            });
        }
        !unresolved
    });
}
