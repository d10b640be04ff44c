//! Two-phase configuration commit
//!
//! Phase one sends one `edit-config` per modification, strictly in order and
//! each acknowledged before the next goes out. Phase two commits the
//! candidate datastore. Devices without `:candidate` are edited in running,
//! where every acknowledged edit is already live and there is nothing left
//! to commit.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use serde_json::Value;

use crate::capability::SessionPreferences;
use crate::correlator::RequestCorrelator;
use crate::device::DeviceId;
use crate::error::{NetconfError, Result};
use crate::instance_id::YangPath;
use crate::request_builder::{self, Datastore, RpcRequest};
use crate::transform::MessageTransformer;

/// What an edit does to the addressed node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Replace,
    Merge,
    Remove,
}

impl EditAction {
    /// `operation` attribute of the deepest edit element
    fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Replace => Some("replace"),
            Self::Merge => None,
            Self::Remove => Some("remove"),
        }
    }

    /// `default-operation` of the edit-config; merge keeps the device default
    fn default_operation(&self) -> Option<&'static str> {
        match self {
            Self::Merge => None,
            Self::Replace | Self::Remove => Some("none"),
        }
    }
}

/// One change addressed by path
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub path: YangPath,
    pub action: EditAction,
    /// Content of the addressed node as a JSON object
    pub payload: Option<Value>,
}

impl Modification {
    pub fn replace(path: YangPath, payload: Value) -> Self {
        Self {
            path,
            action: EditAction::Replace,
            payload: Some(payload),
        }
    }

    pub fn merge(path: YangPath, payload: Value) -> Self {
        Self {
            path,
            action: EditAction::Merge,
            payload: Some(payload),
        }
    }

    pub fn remove(path: YangPath) -> Self {
        Self {
            path,
            action: EditAction::Remove,
            payload: None,
        }
    }
}

/// Order in which the edits of a set are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditOrdering {
    /// All removals, then merges and replaces; each group keeps its order
    #[default]
    RemovalsFirst,
    /// Exactly the order the modifications were added in
    AsGiven,
}

/// Modifications making up one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModificationSet {
    modifications: Vec<Modification>,
}

impl ModificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, modification: Modification) {
        self.modifications.push(modification);
    }

    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modification> {
        self.modifications.iter()
    }

    /// Modifications in sending order
    pub fn ordered(&self, ordering: EditOrdering) -> Vec<&Modification> {
        match ordering {
            EditOrdering::AsGiven => self.modifications.iter().collect(),
            EditOrdering::RemovalsFirst => {
                let (mut removals, rest): (Vec<_>, Vec<_>) = self
                    .modifications
                    .iter()
                    .partition(|m| m.action == EditAction::Remove);
                removals.extend(rest);
                removals
            }
        }
    }
}

impl FromIterator<Modification> for ModificationSet {
    fn from_iter<I: IntoIterator<Item = Modification>>(iter: I) -> Self {
        Self {
            modifications: iter.into_iter().collect(),
        }
    }
}

/// A write transaction against one device
///
/// Finished exactly once, by [`finish`](Self::finish), [`rollback`](Self::rollback)
/// or a failed [`prepare`](Self::prepare).
#[derive(Debug)]
pub struct TwoPhaseConfigCommit {
    device: DeviceId,
    correlator: RequestCorrelator,
    transformer: Option<MessageTransformer>,
    target: Datastore,
    rollback_on_error: bool,
    ordering: EditOrdering,
    finished: AtomicBool,
}

impl TwoPhaseConfigCommit {
    /// Create a transaction; target and error-option follow the device capabilities
    pub fn new(
        device: DeviceId,
        correlator: RequestCorrelator,
        preferences: &SessionPreferences,
        transformer: Option<MessageTransformer>,
        ordering: EditOrdering,
    ) -> Self {
        let target = if preferences.is_candidate_supported() {
            Datastore::Candidate
        } else {
            Datastore::Running
        };
        Self {
            device,
            correlator,
            transformer,
            target,
            rollback_on_error: preferences.is_rollback_supported(),
            ordering,
            finished: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> Datastore {
        self.target
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Send every edit of `modifications`, stopping at the first failure
    ///
    /// On failure the transaction is finished and, on candidate, the staged
    /// changes are discarded.
    pub async fn prepare(&self, modifications: &ModificationSet) -> Result<()> {
        if self.is_finished() {
            return Err(NetconfError::TransactionFinished);
        }

        for modification in modifications.ordered(self.ordering) {
            let request = match self.edit_request(modification) {
                Ok(request) => request,
                Err(e) => {
                    self.abort(&modification.path, &e).await;
                    return Err(e);
                }
            };
            tracing::debug!(
                device = %self.device,
                target = %self.target,
                path = %modification.path,
                action = ?modification.action,
                "sending edit"
            );
            if let Err(e) = self.correlator.invoke(&request.name, request.body).await {
                self.abort(&modification.path, &e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Commit the candidate datastore
    pub async fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(NetconfError::TransactionFinished);
        }
        if self.target == Datastore::Running {
            tracing::debug!(device = %self.device, "running datastore edited directly, nothing to commit");
            return Ok(());
        }

        let commit = request_builder::commit();
        match self.correlator.invoke(&commit.name, commit.body).await {
            Ok(_) => {
                tracing::debug!(device = %self.device, "commit successful");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %self.device, error = %e, "commit failed, discarding changes");
                self.discard_changes().await;
                Err(e)
            }
        }
    }

    /// Drop staged changes; only possible on candidate
    pub async fn rollback(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(NetconfError::TransactionFinished);
        }
        if self.target != Datastore::Candidate {
            return Err(NetconfError::Unsupported(
                "rollback requires the candidate datastore".into(),
            ));
        }
        let discard = request_builder::discard_changes();
        self.correlator
            .invoke(&discard.name, discard.body)
            .await
            .map(|_| ())
    }

    fn edit_request(&self, modification: &Modification) -> Result<RpcRequest> {
        let last = modification
            .path
            .last()
            .ok_or_else(|| NetconfError::InvalidPath("empty path".into()))?;

        let children = match (&modification.payload, modification.action) {
            (_, EditAction::Remove) | (None, _) => Vec::new(),
            (Some(payload), _) => {
                let transformer = self
                    .transformer
                    .as_ref()
                    .ok_or(NetconfError::SchemaUnavailable)?;
                transformer.json_to_elements(&last.name.namespace, payload)?
            }
        };

        let config = modification
            .path
            .edit_structure(modification.action.operation(), children)?;
        Ok(request_builder::edit_config(
            self.target,
            config,
            modification.action.default_operation(),
            self.rollback_on_error,
        ))
    }

    async fn abort(&self, path: &YangPath, error: &NetconfError) {
        tracing::warn!(
            device = %self.device,
            path = %path,
            error = %error,
            "edit failed, aborting transaction"
        );
        self.finished.store(true, Ordering::Release);
        if self.target == Datastore::Candidate {
            self.discard_changes().await;
        }
    }

    async fn discard_changes(&self) {
        let discard = request_builder::discard_changes();
        match self.correlator.invoke(&discard.name, discard.body).await {
            Ok(_) => tracing::debug!(device = %self.device, "discarded staged changes"),
            Err(e) => tracing::error!(
                device = %self.device,
                error = %e,
                "discarding changes failed, device configuration might be inconsistent"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_id::PathArgument;
    use crate::qname::QName;

    fn path(names: &[&str]) -> YangPath {
        YangPath::new(
            names
                .iter()
                .map(|n| PathArgument::node(QName::new("urn:a", *n)))
                .collect(),
        )
    }

    #[test]
    fn test_removals_first_ordering() {
        let set: ModificationSet = [
            Modification::merge(path(&["a", "c"]), serde_json::json!({})),
            Modification::remove(path(&["a", "b"])),
            Modification::replace(path(&["a", "d"]), serde_json::json!({})),
            Modification::remove(path(&["a", "e"])),
        ]
        .into_iter()
        .collect();

        let names = |ordering| {
            set.ordered(ordering)
                .iter()
                .map(|m| m.path.last().unwrap().name.local_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(EditOrdering::RemovalsFirst), ["b", "e", "c", "d"]);
        assert_eq!(names(EditOrdering::AsGiven), ["c", "b", "d", "e"]);
    }

    #[test]
    fn test_edit_attributes() {
        assert_eq!(EditAction::Merge.operation(), None);
        assert_eq!(EditAction::Replace.operation(), Some("replace"));
        assert_eq!(EditAction::Remove.operation(), Some("remove"));
        assert_eq!(EditAction::Merge.default_operation(), None);
    }

    #[test]
    fn test_ordering_from_config_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            ordering: EditOrdering,
        }
        let parsed: Wrapper = toml::from_str(r#"ordering = "as-given""#).unwrap();
        assert_eq!(parsed.ordering, EditOrdering::AsGiven);
    }
}
