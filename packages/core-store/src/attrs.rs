//! Entry attributes: a nested map under every entry, with batched commits.
//!
//! Attribute keys use the same slash syntax as entry paths, so
//! `attrs.set("calibration/gain", 2.0)` creates the intermediate
//! `calibration` map. Outside a transaction every mutation is written to the
//! backend immediately. Inside one, the map is cached per owning entry and
//! written once on commit.

use std::collections::HashMap;
use std::fmt;

use crate::backend::Backend;
use crate::entry::{Entry, Root};
use crate::{Error, Path, PathError, Value};

/// Cached attribute map of one locked entry.
struct AttrSlot {
    map: Option<Value>,
    dirty: bool,
}

/// Per-root attribute cache; a slot exists only while its entry is locked.
#[derive(Default)]
pub(crate) struct AttributeStore {
    slots: HashMap<Path, AttrSlot>,
}

impl AttributeStore {
    /// Lock the attributes of `path`. True only if this call took the lock.
    pub fn lock(&mut self, path: &Path) -> bool {
        if self.slots.contains_key(path) {
            return false;
        }
        log::trace!("attributes of '{}' locked", path);
        self.slots.insert(
            path.clone(),
            AttrSlot {
                map: None,
                dirty: false,
            },
        );
        true
    }

    /// Current attribute map of `path`, from the cache when locked.
    pub fn read<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: &Path,
    ) -> Result<Value, Error> {
        match self.slots.get_mut(path) {
            Some(slot) => Ok(Self::cached(slot, backend, path)?.clone()),
            None => backend.load_attributes(path),
        }
    }

    /// Apply `f` to the attribute map of `path`.
    ///
    /// `f` returns whether it changed the map. Unlocked changes are stored at
    /// once; locked changes mark the slot dirty.
    pub fn update<B, F>(&mut self, backend: &mut B, path: &Path, f: F) -> Result<(), Error>
    where
        B: Backend + ?Sized,
        F: FnOnce(&mut Value) -> Result<bool, Error>,
    {
        match self.slots.get_mut(path) {
            Some(slot) => {
                let changed = f(Self::cached(slot, backend, path)?)?;
                if changed {
                    log::trace!("attributes of '{}' changed while locked", path);
                    slot.dirty = true;
                }
                Ok(())
            }
            None => {
                let mut map = backend.load_attributes(path)?;
                if f(&mut map)? {
                    backend.store_attributes(path, &map)?;
                }
                Ok(())
            }
        }
    }

    /// Release the lock on `path`, storing the cached map once if dirty.
    pub fn commit<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: &Path,
    ) -> Result<(), Error> {
        if let Some(slot) = self.slots.remove(path) {
            log::trace!("attributes of '{}' committed (dirty: {})", path, slot.dirty);
            if let (true, Some(map)) = (slot.dirty, slot.map) {
                backend.store_attributes(path, &map)?;
            }
        }
        Ok(())
    }

    /// Release the lock on `path` and discard its cached map.
    pub fn rollback(&mut self, path: &Path) {
        if self.slots.remove(path).is_some() {
            log::trace!("attributes of '{}' rolled back", path);
        }
    }

    /// Drop every slot at or below `prefix`, after the subtree was deleted.
    pub fn forget_under(&mut self, prefix: &Path) {
        self.slots.retain(|path, _| !path.has_prefix(prefix));
    }

    fn cached<'s, B: Backend + ?Sized>(
        slot: &'s mut AttrSlot,
        backend: &mut B,
        path: &Path,
    ) -> Result<&'s mut Value, Error> {
        if slot.map.is_none() {
            slot.map = Some(backend.load_attributes(path)?);
        }
        Ok(slot.map.get_or_insert_with(Value::map))
    }
}

/// A position inside an entry's attribute map.
///
/// Obtained from [`Entry::attrs`]; [`AttributeEntry::at`] moves deeper the
/// same way [`Entry::at`] does for entries.
pub struct AttributeEntry<'r, B: Backend> {
    entry: Entry<'r, B>,
    sub_path: Path,
}

impl<'r, B: Backend> AttributeEntry<'r, B> {
    pub(crate) fn new(entry: Entry<'r, B>) -> Self {
        AttributeEntry {
            entry,
            sub_path: Path::root(),
        }
    }

    /// The entry owning these attributes.
    pub fn entry(&self) -> &Entry<'r, B> {
        &self.entry
    }

    /// Position inside the attribute map.
    pub fn sub_path(&self) -> &Path {
        &self.sub_path
    }

    /// Resolve `key_path` relative to this position; a leading `/` starts
    /// from the top of the map.
    pub fn at(&self, key_path: &str) -> Result<Self, Error> {
        Ok(AttributeEntry {
            entry: self.entry.clone(),
            sub_path: self.key(key_path)?,
        })
    }

    fn key(&self, key_path: &str) -> Result<Path, Error> {
        let spec = Path::parse(key_path)?;
        Ok(self.sub_path.apply(&spec)?)
    }

    fn root(&self) -> &'r Root<B> {
        self.entry.root()
    }

    fn load(&self) -> Result<Value, Error> {
        self.entry.check_valid()?;
        self.root().read_attributes(self.entry.path())
    }

    /// The value at `key_path`.
    pub fn get(&self, key_path: &str) -> Result<Value, Error> {
        let key = self.key(key_path)?;
        self.try_get_key(&key)?.ok_or_else(|| Error::AttributeNotFound {
            path: self.entry.path().to_string(),
            key: key.to_string(),
        })
    }

    /// The value at `key_path`, or `None` if it is not set.
    pub fn try_get(&self, key_path: &str) -> Result<Option<Value>, Error> {
        let key = self.key(key_path)?;
        self.try_get_key(&key)
    }

    fn try_get_key(&self, key: &Path) -> Result<Option<Value>, Error> {
        Ok(self.load()?.get(key).cloned())
    }

    pub fn contains(&self, key_path: &str) -> Result<bool, Error> {
        Ok(self.try_get(key_path)?.is_some())
    }

    /// The whole map below this position (an empty map if nothing is set).
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(self
            .try_get_key(&self.sub_path)?
            .unwrap_or_else(Value::map))
    }

    /// Keys of the map at this position.
    pub fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(match self.to_value()? {
            Value::Map(map) => map.into_keys().collect(),
            _ => Vec::new(),
        })
    }

    /// Set `key_path`, creating intermediate maps.
    ///
    /// If the owning entry does not exist yet it is created as a group. In
    /// append mode an existing key may only be set to its current value.
    pub fn set(&self, key_path: &str, value: impl Into<Value>) -> Result<(), Error> {
        let key = self.key(key_path)?;
        if key.is_root() {
            return Err(PathError::invalid("attribute key path is empty").into());
        }
        let value = value.into();
        self.entry.check_valid()?;
        let root = self.root();
        let path = self.entry.path();
        root.ensure_attribute_owner(path)?;

        let mode = root.mode();
        root.update_attributes(path, |map| {
            match map.get(&key) {
                Some(current) if *current == value => return Ok(false),
                Some(_) if !mode.allows_overwrite() => {
                    return Err(Error::read_only(
                        path,
                        format!("attribute '{}' already set (mode '{}')", key, mode),
                    ))
                }
                _ => {}
            }
            map.set(&key, value)?;
            Ok(true)
        })
    }

    /// Remove `key_path`, returning the removed value.
    pub fn delete(&self, key_path: &str) -> Result<Value, Error> {
        let key = self.key(key_path)?;
        self.entry.check_valid()?;
        let root = self.root();
        let path = self.entry.path();
        let mode = root.mode();
        if !mode.allows_overwrite() {
            return Err(Error::read_only(
                path,
                format!("cannot delete attribute '{}' (mode '{}')", key, mode),
            ));
        }

        let mut removed = None;
        root.update_attributes(path, |map| {
            removed = if key.is_root() {
                Some(std::mem::replace(map, Value::map()))
            } else {
                map.remove(&key)?
            };
            Ok(removed.is_some())
        })?;
        removed.ok_or_else(|| Error::AttributeNotFound {
            path: path.to_string(),
            key: key.to_string(),
        })
    }

    /// Start a batch: attribute writes of this entry are cached until the
    /// returned guard is committed.
    pub fn transaction(&self) -> Result<AttrTransaction<'r, B>, Error> {
        self.entry.check_valid()?;
        let acquired = self.root().lock_attributes(self.entry.path());
        Ok(AttrTransaction {
            root: self.root(),
            path: self.entry.path().clone(),
            acquired,
            finished: false,
        })
    }
}

impl<B: Backend> fmt::Debug for AttributeEntry<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeEntry")
            .field("entry", &self.entry.path().to_string())
            .field("key", &self.sub_path.to_string())
            .finish()
    }
}

/// A batch of attribute writes on one entry.
///
/// Only the guard that took the lock persists anything: nested guards on an
/// entry that is already locked are no-ops, and the outer guard commits the
/// whole batch in a single backend write. Dropping an unfinished guard rolls
/// back.
#[must_use = "dropping the transaction rolls it back"]
pub struct AttrTransaction<'r, B: Backend> {
    root: &'r Root<B>,
    path: Path,
    acquired: bool,
    finished: bool,
}

impl<B: Backend> AttrTransaction<'_, B> {
    /// True if this guard took the lock and will finalize the batch.
    pub fn acquired(&self) -> bool {
        self.acquired
    }

    /// Persist the batch (once, if anything changed).
    pub fn commit(mut self) -> Result<(), Error> {
        self.finished = true;
        if self.acquired {
            self.root.commit_attributes(&self.path)
        } else {
            Ok(())
        }
    }

    /// Discard the batch; the next read reloads from the backend.
    pub fn rollback(mut self) {
        self.finished = true;
        if self.acquired {
            self.root.rollback_attributes(&self.path);
        }
    }
}

impl<B: Backend> Drop for AttrTransaction<'_, B> {
    fn drop(&mut self) {
        if self.acquired && !self.finished {
            log::debug!("uncommitted attribute transaction on '{}' dropped", self.path);
            self.root.rollback_attributes(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MapBackend;
    use crate::{OpenMode, TypeTag};

    fn root(mode: OpenMode) -> Root<MapBackend> {
        Root::new(MapBackend::new(mode))
    }

    fn attribute_writes(root: &Root<MapBackend>) -> usize {
        root.with_backend(|b| b.attribute_writes)
    }

    #[test]
    fn set_and_get_nested_keys() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        attrs.set("calibration/gain", 2.5).unwrap();
        attrs.set("name", "run1").unwrap();

        assert_eq!(attrs.get("calibration/gain").unwrap(), Value::Float(2.5));
        assert_eq!(attrs.at("calibration").unwrap().get("gain").unwrap(), Value::Float(2.5));
        assert_eq!(attrs.keys().unwrap(), vec!["calibration", "name"]);
        assert!(attrs.get("calibration").unwrap().is_map());
        assert!(attrs.contains("name").unwrap());
        assert!(!attrs.contains("missing").unwrap());
    }

    #[test]
    fn missing_key_is_attribute_not_found() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        assert!(matches!(
            attrs.get("nope"),
            Err(Error::AttributeNotFound { key, .. }) if key == "nope"
        ));
        assert!(matches!(attrs.delete("nope"), Err(Error::AttributeNotFound { .. })));
        assert_eq!(attrs.try_get("nope").unwrap(), None);
    }

    #[test]
    fn delete_returns_removed_value() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        attrs.set("a/b", 1i64).unwrap();
        assert_eq!(attrs.delete("a/b").unwrap(), Value::Integer(1));
        assert!(attrs.get("a").unwrap().is_empty_map());
    }

    #[test]
    fn set_on_missing_entry_creates_group() {
        let root = root(OpenMode::ReadWrite);
        root.entry().at("x/y").unwrap().attrs().set("k", 1i64).unwrap();
        assert_eq!(root.entry().at("x/y").unwrap().type_tag().unwrap(), TypeTag::Group);
    }

    #[test]
    fn get_on_missing_entry_is_not_found() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().at("ghost").unwrap().attrs();
        assert!(matches!(attrs.get("k"), Err(Error::EntryNotFound { .. })));
    }

    #[test]
    fn writes_outside_a_transaction_store_immediately() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        attrs.set("a", 1i64).unwrap();
        attrs.set("b", 2i64).unwrap();
        assert_eq!(attribute_writes(&root), 2);

        // Unchanged values are not written again.
        attrs.set("a", 1i64).unwrap();
        assert_eq!(attribute_writes(&root), 2);
    }

    #[test]
    fn transaction_writes_once() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        let tx = attrs.transaction().unwrap();
        assert!(tx.acquired());
        attrs.set("a", 1i64).unwrap();
        attrs.set("b/c", 2i64).unwrap();
        attrs.set("d", "x").unwrap();
        assert_eq!(attribute_writes(&root), 0);
        assert_eq!(attrs.get("b/c").unwrap(), Value::Integer(2));
        tx.commit().unwrap();
        assert_eq!(attribute_writes(&root), 1);
        assert_eq!(attrs.keys().unwrap(), vec!["a", "b", "d"]);
    }

    #[test]
    fn nested_transaction_does_not_finalize() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        let outer = attrs.transaction().unwrap();
        let inner = attrs.transaction().unwrap();
        assert!(!inner.acquired());
        attrs.set("a", 1i64).unwrap();
        inner.commit().unwrap();
        assert_eq!(attribute_writes(&root), 0);
        outer.commit().unwrap();
        assert_eq!(attribute_writes(&root), 1);
    }

    #[test]
    fn rollback_discards_changes() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        attrs.set("kept", true).unwrap();

        let tx = attrs.transaction().unwrap();
        attrs.set("dropped", true).unwrap();
        tx.rollback();
        assert!(!attrs.contains("dropped").unwrap());

        {
            let _tx = attrs.transaction().unwrap();
            attrs.set("also_dropped", true).unwrap();
        }
        assert!(!attrs.contains("also_dropped").unwrap());
        assert!(attrs.contains("kept").unwrap());
        assert_eq!(attribute_writes(&root), 1);
    }

    #[test]
    fn read_mode_refuses_attribute_writes() {
        let root = root(OpenMode::Read);
        let attrs = root.entry().attrs();
        assert!(matches!(attrs.set("a", 1i64), Err(Error::ReadOnlyViolation { .. })));
        assert!(matches!(attrs.delete("a"), Err(Error::ReadOnlyViolation { .. })));
    }

    #[test]
    fn append_mode_only_adds_keys() {
        let root = root(OpenMode::Append);
        let attrs = root.entry().attrs();
        attrs.set("a", 1i64).unwrap();
        attrs.set("b", 2i64).unwrap();
        attrs.set("a", 1i64).unwrap();
        assert!(matches!(attrs.set("a", 5i64), Err(Error::ReadOnlyViolation { .. })));
        assert!(matches!(attrs.delete("b"), Err(Error::ReadOnlyViolation { .. })));
        assert_eq!(attrs.get("a").unwrap(), Value::Integer(1));
    }

    #[test]
    fn absolute_key_paths_start_at_top() {
        let root = root(OpenMode::ReadWrite);
        let attrs = root.entry().attrs();
        attrs.set("x/y", 1i64).unwrap();
        attrs.set("z", 2i64).unwrap();
        let nested = attrs.at("x").unwrap();
        assert_eq!(nested.get("/z").unwrap(), Value::Integer(2));
        assert_eq!(nested.get("../z").unwrap(), Value::Integer(2));
        assert!(attrs.get("a//b").is_err());
    }
}
