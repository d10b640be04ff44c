//! Process-wide schema source cache
//!
//! Shared between devices through an `Arc`. Optionally persisted under a
//! directory as `<module>@<revision>.yang` files so sources survive restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{SchemaSource, SourceIdentifier};
use crate::error::Result;

/// Schema text keyed by (module name, revision)
#[derive(Debug, Default)]
pub struct SchemaSourceCache {
    sources: RwLock<HashMap<SourceIdentifier, Arc<str>>>,
    directory: Option<PathBuf>,
}

impl SchemaSourceCache {
    /// Create an in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache persisted under `directory`, loading any sources already there
    pub fn with_directory(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let mut sources = HashMap::new();
        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(SourceIdentifier::from_file_name)
            else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(text) => {
                    sources.insert(id, Arc::from(text));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable schema source");
                }
            }
        }
        tracing::debug!(dir = %directory.display(), count = sources.len(), "loaded schema cache");

        Ok(Self {
            sources: RwLock::new(sources),
            directory: Some(directory),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SourceIdentifier, Arc<str>>> {
        self.sources.read().unwrap_or_else(|poisoned| {
            tracing::warn!("schema cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SourceIdentifier, Arc<str>>> {
        self.sources.write().unwrap_or_else(|poisoned| {
            tracing::warn!("schema cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Look up a source
    ///
    /// A request without revision falls back to the newest cached revision of
    /// the same module.
    pub fn get(&self, id: &SourceIdentifier) -> Option<SchemaSource> {
        let sources = self.read();
        if let Some(text) = sources.get(id) {
            return Some(SchemaSource::new(id.clone(), text.clone()));
        }
        if id.revision.is_some() {
            return None;
        }
        sources
            .iter()
            .filter(|(cached, _)| cached.name == id.name)
            .max_by(|(a, _), (b, _)| a.revision.cmp(&b.revision))
            .map(|(cached, text)| SchemaSource::new(cached.clone(), text.clone()))
    }

    pub fn contains(&self, id: &SourceIdentifier) -> bool {
        self.read().contains_key(id)
    }

    /// Store a source, writing it to the cache directory when one is configured
    ///
    /// Sources whose name or revision cannot form a safe file name are kept in
    /// memory only.
    pub fn insert(&self, source: &SchemaSource) -> Result<()> {
        if let Some(dir) = &self.directory {
            if source.id.is_well_formed() {
                fs::write(dir.join(source.id.file_name()), source.text.as_bytes())?;
            } else {
                tracing::warn!(source = %source.id, "malformed module name or revision, not persisting schema source");
            }
        }
        self.write().insert(source.id.clone(), source.text.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisionless_lookup_picks_newest() {
        let cache = SchemaSourceCache::new();
        cache
            .insert(&SchemaSource::new(SourceIdentifier::new("m", Some("2013-01-01")), "old"))
            .unwrap();
        cache
            .insert(&SchemaSource::new(SourceIdentifier::new("m", Some("2014-01-01")), "new"))
            .unwrap();

        let found = cache.get(&SourceIdentifier::new("m", None)).unwrap();
        assert_eq!(&*found.text, "new");
        assert!(cache.get(&SourceIdentifier::new("m", Some("2015-01-01"))).is_none());
    }

    #[test]
    fn test_directory_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let id = SourceIdentifier::new("example-mod", Some("2014-01-08"));

        {
            let cache = SchemaSourceCache::with_directory(dir.path()).unwrap();
            cache
                .insert(&SchemaSource::new(id.clone(), "module example-mod {}"))
                .unwrap();
        }
        assert!(dir.path().join("example-mod@2014-01-08.yang").exists());

        let reloaded = SchemaSourceCache::with_directory(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(&*reloaded.get(&id).unwrap().text, "module example-mod {}");
    }

    #[test]
    fn test_malformed_identifiers_stay_in_memory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("cache");
        let cache = SchemaSourceCache::with_directory(&dir).unwrap();

        let capability =
            crate::capability::Capability::parse("urn:x?module=../escaped&revision=2020-01-01")
                .unwrap();
        let escaping = SchemaSource::new(capability.source_id(), "module escaped {}");
        let bad_revision = SchemaSource::new(
            SourceIdentifier::new("ok", Some("../../2020-01-01")),
            "module ok {}",
        );
        cache.insert(&escaping).unwrap();
        cache.insert(&bad_revision).unwrap();

        assert!(!root.path().join("escaped@2020-01-01.yang").exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        // still served from memory
        assert_eq!(&*cache.get(&escaping.id).unwrap().text, "module escaped {}");
        assert_eq!(cache.len(), 2);
    }
}
