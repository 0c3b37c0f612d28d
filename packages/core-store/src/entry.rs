//! Entry handles and the store root that owns the backend.
//!
//! An [`Entry`] is a lazy `(root, path)` pair: creating one never touches
//! storage, and its type is queried from the backend on every call. The
//! [`Root`] owns the backend and the attribute cache, and remembers which
//! subtrees were deleted so that handles created before a deletion can be
//! told apart from fresh ones.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use crate::attrs::{AttributeEntry, AttributeStore};
use crate::backend::{ensure_writable, Backend, ChildFilter};
use crate::payload::{NdArray, PayloadValue, Table};
use crate::{Error, OpenMode, Path, PathError, TypeTag, Value};

/// The owner of an opened store.
///
/// Handles borrow the root, so the backend outlives every [`Entry`]. Dropping
/// a root that was not closed closes its backend and logs any failure.
pub struct Root<B: Backend> {
    backend: RefCell<B>,
    attrs: RefCell<AttributeStore>,
    /// `(deleted path, clock value of the delete)`
    tombstones: RefCell<Vec<(Path, u64)>>,
    clock: Cell<u64>,
    closed: Cell<bool>,
}

impl<B: Backend> Root<B> {
    pub fn new(backend: B) -> Self {
        log::debug!("opened {} (mode '{}')", backend.describe(), backend.mode());
        Root {
            backend: RefCell::new(backend),
            attrs: RefCell::new(AttributeStore::default()),
            tombstones: RefCell::new(Vec::new()),
            clock: Cell::new(0),
            closed: Cell::new(false),
        }
    }

    /// The handle of the root group.
    pub fn entry(&self) -> Entry<'_, B> {
        Entry {
            root: self,
            path: Path::root(),
            born: self.clock.get(),
        }
    }

    /// Shorthand for `self.entry().at(path_text)`.
    pub fn at(&self, path_text: &str) -> Result<Entry<'_, B>, Error> {
        self.entry().at(path_text)
    }

    pub fn mode(&self) -> OpenMode {
        self.backend.borrow().mode()
    }

    pub fn describe(&self) -> String {
        self.backend.borrow().describe()
    }

    /// Run `f` with direct access to the backend.
    ///
    /// Changes made this way bypass the attribute cache and handle
    /// invalidation.
    pub fn with_backend<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        f(&mut *self.backend.borrow_mut())
    }

    /// Copy every child and root attribute of `other` into this root,
    /// replacing entries that already exist.
    pub fn update_from<S: Backend>(&self, other: &Root<S>) -> Result<(), Error> {
        let target = self.entry();
        let source = other.entry();
        let tx = target.attrs().transaction()?;
        let attributes = other.read_attributes(source.path())?;
        self.merge_attributes(target.path(), attributes)?;
        for name in source.keys()? {
            target.put_entry(
                &name,
                &source.child(&name)?,
                PutOptions {
                    overwrite: true,
                    delete_source: false,
                },
            )?;
        }
        tx.commit()
    }

    /// Close the backend.
    pub fn close(self) -> Result<(), Error> {
        self.closed.set(true);
        let result = self.backend.borrow_mut().close();
        log::debug!("closed {}", self.describe());
        result
    }

    fn tick(&self) -> u64 {
        let now = self.clock.get() + 1;
        self.clock.set(now);
        now
    }

    fn is_invalidated(&self, path: &Path, born: u64) -> bool {
        self.tombstones
            .borrow()
            .iter()
            .any(|(deleted, at)| *at > born && path.has_prefix(deleted))
    }

    fn check_writable(&self, path: &Path, operation: &str) -> Result<(), Error> {
        ensure_writable(self.mode(), path, operation)
    }

    fn check_overwrite(&self, path: &Path, operation: &str) -> Result<(), Error> {
        let mode = self.mode();
        if mode.allows_overwrite() {
            Ok(())
        } else {
            Err(Error::read_only(
                path,
                format!("{} refused: entry exists and mode is '{}'", operation, mode),
            ))
        }
    }

    fn check_delete(&self, path: &Path) -> Result<(), Error> {
        self.check_writable(path, "delete")?;
        let mode = self.mode();
        if mode.allows_overwrite() {
            Ok(())
        } else {
            Err(Error::read_only(
                path,
                format!("delete refused in mode '{}'", mode),
            ))
        }
    }

    fn stored_type(&self, path: &Path) -> Result<Option<TypeTag>, Error> {
        match self.backend.borrow_mut().type_of(path) {
            Ok(tag) => Ok(Some(tag)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        self.backend.borrow_mut().list_children(path, filter)
    }

    /// Create `path` and every missing ancestor as groups.
    fn ensure_group(&self, path: &Path) -> Result<(), Error> {
        let mut current = Path::root();
        for component in path.iter() {
            current = current.child(component)?;
            match self.stored_type(&current)? {
                Some(TypeTag::Group) => {}
                Some(other) => {
                    return Err(Error::already_exists(
                        &current,
                        format!("{} stored where a group is needed", other),
                    ))
                }
                None => {
                    self.check_writable(&current, "create group")?;
                    self.backend
                        .borrow_mut()
                        .create_node(&current, TypeTag::Group)?;
                }
            }
        }
        Ok(())
    }

    /// Store a payload, applying the mode and overwrite rules.
    fn write_entry(&self, path: &Path, tag: TypeTag, value: &PayloadValue) -> Result<(), Error> {
        self.check_writable(path, "write")?;
        let parent = path
            .parent()
            .ok_or_else(|| PathError::invalid("cannot store a payload at the root"))?;
        self.ensure_group(&parent)?;

        // Array attributes of the parent change at most once per write.
        let acquired = self.lock_attributes(&parent);
        let result = self.write_entry_locked(path, tag, value);
        if acquired {
            match &result {
                Ok(()) => self.commit_attributes(&parent)?,
                Err(_) => self.rollback_attributes(&parent),
            }
        }
        result
    }

    fn write_entry_locked(
        &self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        if let Some(existing) = self.stored_type(path)? {
            self.check_overwrite(path, "write")?;
            if existing != tag {
                log::debug!("replacing {} at '{}' with {}", existing, path, tag);
                self.delete_recursive(path, false)?;
            }
        }
        self.backend.borrow_mut().write_payload(path, tag, value)?;
        if let PayloadValue::Array(array) = value {
            self.sync_array_attributes(path, Some(array))?;
        }
        Ok(())
    }

    fn create_group_at(&self, path: &Path) -> Result<(), Error> {
        self.check_writable(path, "create group")?;
        match self.stored_type(path)? {
            Some(TypeTag::Group) => Ok(()),
            Some(other) => {
                self.check_overwrite(path, "create group")?;
                log::debug!("replacing {} at '{}' with a group", other, path);
                self.delete_recursive(path, false)?;
                self.ensure_group(path)
            }
            None => self.ensure_group(path),
        }
    }

    /// Record or clear `name/dtype`, `name/shape` and `name/byteorder` on the
    /// parent of the array payload at `path`.
    fn sync_array_attributes(&self, path: &Path, array: Option<&NdArray>) -> Result<(), Error> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(());
        };
        let prefix = Path::root().child(name)?;
        let dtype = prefix.child("dtype")?;
        let shape = prefix.child("shape")?;
        let byteorder = prefix.child("byteorder")?;

        self.update_attributes(&parent, |map| match array {
            Some(array) => {
                let shape_value =
                    Value::Array(array.shape().iter().map(|d| Value::from(*d)).collect());
                let updates = [
                    (dtype, Value::from(array.dtype().as_str())),
                    (shape, shape_value),
                    (byteorder, Value::from(array.byteorder().as_str())),
                ];
                let mut changed = false;
                for (key, value) in updates {
                    if map.get(&key) != Some(&value) {
                        map.set(&key, value)?;
                        changed = true;
                    }
                }
                Ok(changed)
            }
            None => {
                let mut changed = false;
                for key in [dtype, shape, byteorder] {
                    changed |= map.remove(&key)?.is_some();
                }
                if map.get(&prefix).is_some_and(Value::is_empty_map) {
                    map.remove(&prefix)?;
                    changed = true;
                }
                Ok(changed)
            }
        })
    }

    /// Delete `path` and everything below it: payloads first, then
    /// sub-groups depth-first, then the node's own attributes and the node.
    fn delete_recursive(&self, path: &Path, tombstone: bool) -> Result<(), Error> {
        let tag = self
            .stored_type(path)?
            .ok_or_else(|| Error::not_found(path))?;

        if tag == TypeTag::Group {
            for name in self.list(path, ChildFilter::Payloads)? {
                self.delete_recursive(&path.child(&name)?, false)?;
            }
            for name in self.list(path, ChildFilter::Groups)? {
                self.delete_recursive(&path.child(&name)?, false)?;
            }
        }

        {
            let mut backend = self.backend.borrow_mut();
            if !backend.load_attributes(path)?.is_empty_map() {
                backend.store_attributes(path, &Value::map())?;
            }
            log::debug!("deleting {} at '{}'", tag, path);
            backend.delete_node(path)?;
        }
        self.attrs.borrow_mut().forget_under(path);

        if tag.is_array() {
            self.sync_array_attributes(path, None)?;
        }
        if tombstone {
            let at = self.tick();
            let mut tombstones = self.tombstones.borrow_mut();
            // An ancestor tombstone with a later clock covers every older
            // tombstone below it.
            tombstones.retain(|(deleted, _)| !deleted.has_prefix(path));
            tombstones.push((path.clone(), at));
        }
        Ok(())
    }

    /// Copy the entry at `source` (of type `tag`) to `target`, which must not
    /// exist.
    fn copy_node<S: Backend>(
        &self,
        target: &Path,
        source: &Entry<'_, S>,
        tag: TypeTag,
    ) -> Result<(), Error> {
        let attributes = source.root.read_attributes(source.path())?;
        if tag.is_payload() {
            let value = source.read(tag)?;
            self.write_entry(target, tag, &value)?;
            return self.merge_attributes(target, attributes);
        }

        self.ensure_group(target)?;
        let acquired = self.lock_attributes(target);
        let result = (|| -> Result<(), Error> {
            self.merge_attributes(target, attributes)?;
            for filter in [ChildFilter::Payloads, ChildFilter::Groups] {
                for name in source.root.list(source.path(), filter)? {
                    let child = source.child(&name)?;
                    let child_tag = child.type_tag()?;
                    self.copy_node(&target.child(&name)?, &child, child_tag)?;
                }
            }
            Ok(())
        })();
        if acquired {
            match &result {
                Ok(()) => self.commit_attributes(target)?,
                Err(_) => self.rollback_attributes(target),
            }
        }
        result
    }

    fn merge_attributes(&self, path: &Path, attributes: Value) -> Result<(), Error> {
        let Value::Map(entries) = attributes else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }
        self.update_attributes(path, |map| {
            let mut changed = false;
            for (key, value) in entries {
                let key = Path::root().child(&key)?;
                if map.get(&key) != Some(&value) {
                    map.set(&key, value)?;
                    changed = true;
                }
            }
            Ok(changed)
        })
    }

    pub(crate) fn read_attributes(&self, path: &Path) -> Result<Value, Error> {
        self.attrs
            .borrow_mut()
            .read(&mut *self.backend.borrow_mut(), path)
    }

    pub(crate) fn update_attributes<F>(&self, path: &Path, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Value) -> Result<bool, Error>,
    {
        self.attrs
            .borrow_mut()
            .update(&mut *self.backend.borrow_mut(), path, f)
    }

    /// Make sure an attribute write on `path` has a node to land on.
    pub(crate) fn ensure_attribute_owner(&self, path: &Path) -> Result<(), Error> {
        self.check_writable(path, "set attribute")?;
        if self.stored_type(path)?.is_none() {
            self.ensure_group(path)?;
        }
        Ok(())
    }

    pub(crate) fn lock_attributes(&self, path: &Path) -> bool {
        self.attrs.borrow_mut().lock(path)
    }

    pub(crate) fn commit_attributes(&self, path: &Path) -> Result<(), Error> {
        self.attrs
            .borrow_mut()
            .commit(&mut *self.backend.borrow_mut(), path)
    }

    pub(crate) fn rollback_attributes(&self, path: &Path) {
        self.attrs.borrow_mut().rollback(path)
    }
}

impl<B: Backend> Drop for Root<B> {
    fn drop(&mut self) {
        if self.closed.get() {
            return;
        }
        let backend = self.backend.get_mut();
        if let Err(e) = backend.close() {
            log::warn!("failed to close {}: {}", backend.describe(), e);
        }
    }
}

impl<B: Backend> fmt::Debug for Root<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("backend", &self.describe())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Lifecycle state of an [`Entry`] handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing is stored at the path (yet).
    Detached,
    /// A node exists at the path.
    Live,
    /// The path or an ancestor was deleted after this handle was created.
    Invalidated,
}

/// Options for [`Entry::put_entry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Replace an existing entry of the same name.
    pub overwrite: bool,
    /// Delete the source after copying (ignored for a root source).
    pub delete_source: bool,
}

/// A lazy handle to the entry at one path of a [`Root`].
pub struct Entry<'r, B: Backend> {
    root: &'r Root<B>,
    path: Path,
    born: u64,
}

impl<'r, B: Backend> Entry<'r, B> {
    fn with_path(&self, path: Path) -> Self {
        Entry {
            root: self.root,
            path,
            born: self.root.clock.get(),
        }
    }

    pub fn root(&self) -> &'r Root<B> {
        self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last path component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Resolve `path_text` relative to this entry. No I/O.
    ///
    /// ```rust,ignore
    /// let run = root.entry().at("runs/1")?;
    /// let sibling = run.at("../2")?;
    /// let top = run.at("/calibration")?;
    /// ```
    pub fn at(&self, path_text: &str) -> Result<Self, Error> {
        let spec = Path::parse(path_text)?;
        Ok(self.with_path(self.path.apply(&spec)?))
    }

    /// The handle of the child called `name`.
    pub fn child(&self, name: &str) -> Result<Self, Error> {
        Ok(self.with_path(self.path.child(name)?))
    }

    /// The parent handle; the root is its own parent.
    pub fn parent(&self) -> Self {
        self.with_path(self.path.parent().unwrap_or_default())
    }

    pub(crate) fn check_valid(&self) -> Result<(), Error> {
        if self.root.is_invalidated(&self.path, self.born) {
            Err(Error::InvalidatedEntry {
                path: self.path.to_string(),
            })
        } else {
            Ok(())
        }
    }

    pub fn state(&self) -> Result<EntryState, Error> {
        if self.root.is_invalidated(&self.path, self.born) {
            return Ok(EntryState::Invalidated);
        }
        Ok(match self.root.stored_type(&self.path)? {
            Some(_) => EntryState::Live,
            None => EntryState::Detached,
        })
    }

    /// The stored type, queried from the backend.
    pub fn type_tag(&self) -> Result<TypeTag, Error> {
        self.check_valid()?;
        self.root.backend.borrow_mut().type_of(&self.path)
    }

    pub fn exists(&self) -> Result<bool, Error> {
        self.check_valid()?;
        self.root.backend.borrow_mut().exists(&self.path, None)
    }

    pub fn exists_as(&self, tag: TypeTag) -> Result<bool, Error> {
        self.check_valid()?;
        self.root.backend.borrow_mut().exists(&self.path, Some(tag))
    }

    /// Read the payload stored under the `tag` slot.
    pub fn read(&self, tag: TypeTag) -> Result<PayloadValue, Error> {
        self.check_valid()?;
        let stored = self
            .root
            .stored_type(&self.path)?
            .ok_or_else(|| Error::not_found(&self.path))?;
        if stored != tag {
            return Err(Error::TypeMismatch {
                path: self.path.to_string(),
                expected: tag,
                found: stored.to_string(),
            });
        }
        if !tag.is_payload() {
            return Err(Error::unsupported(
                self.root.describe(),
                format!("reading group '{}' as a payload", self.path),
            ));
        }
        self.root.backend.borrow_mut().read_payload(&self.path, tag)
    }

    /// Store `value` under the `tag` slot.
    ///
    /// Missing parents become groups. An existing entry of another type is
    /// deleted first; in append mode any existing entry is refused.
    pub fn write(&self, tag: TypeTag, value: &PayloadValue) -> Result<(), Error> {
        self.check_valid()?;
        value.check_fits(tag, &self.path)?;
        self.root.write_entry(&self.path, tag, value)
    }

    fn read_as<T>(
        &self,
        tag: TypeTag,
        extract: impl FnOnce(PayloadValue) -> Result<T, PayloadValue>,
    ) -> Result<T, Error> {
        extract(self.read(tag)?).map_err(|other| Error::TypeMismatch {
            path: self.path.to_string(),
            expected: tag,
            found: format!("{} payload", other.kind()),
        })
    }

    pub fn read_dataset(&self) -> Result<NdArray, Error> {
        self.read_as(TypeTag::Dataset, |v| match v {
            PayloadValue::Array(array) => Ok(array),
            other => Err(other),
        })
    }

    pub fn write_dataset(&self, array: &NdArray) -> Result<(), Error> {
        self.write(TypeTag::Dataset, &PayloadValue::Array(array.clone()))
    }

    pub fn read_image(&self) -> Result<NdArray, Error> {
        self.read_as(TypeTag::Image, |v| match v {
            PayloadValue::Array(array) => Ok(array),
            other => Err(other),
        })
    }

    pub fn write_image(&self, array: &NdArray) -> Result<(), Error> {
        self.write(TypeTag::Image, &PayloadValue::Array(array.clone()))
    }

    pub fn read_table(&self) -> Result<Table, Error> {
        self.read_as(TypeTag::Table, |v| match v {
            PayloadValue::Table(table) => Ok(table),
            other => Err(other),
        })
    }

    pub fn write_table(&self, table: &Table) -> Result<(), Error> {
        self.write(TypeTag::Table, &PayloadValue::Table(table.clone()))
    }

    pub fn read_keyvalue(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.read_as(TypeTag::KeyValue, |v| match v {
            PayloadValue::KeyValue(map) => Ok(map),
            other => Err(other),
        })
    }

    pub fn write_keyvalue(&self, map: &BTreeMap<String, Value>) -> Result<(), Error> {
        self.write(TypeTag::KeyValue, &PayloadValue::KeyValue(map.clone()))
    }

    pub fn read_binary(&self) -> Result<Bytes, Error> {
        self.read_as(TypeTag::Binary, |v| match v {
            PayloadValue::Binary(bytes) => Ok(bytes),
            other => Err(other),
        })
    }

    pub fn write_binary(&self, bytes: impl Into<Bytes>) -> Result<(), Error> {
        self.write(TypeTag::Binary, &PayloadValue::Binary(bytes.into()))
    }

    /// Make this entry a group, creating missing parents.
    pub fn create_group(&self) -> Result<(), Error> {
        self.check_valid()?;
        self.root.create_group_at(&self.path)
    }

    /// Child handles matching `filter`, in discovery order.
    ///
    /// Payload entries have no children.
    pub fn children(&self, filter: ChildFilter) -> Result<Vec<Self>, Error> {
        self.child_names(filter)?
            .iter()
            .map(|name| self.child(name))
            .collect()
    }

    fn child_names(&self, filter: ChildFilter) -> Result<Vec<String>, Error> {
        self.check_valid()?;
        match self.root.stored_type(&self.path)? {
            None => Err(Error::not_found(&self.path)),
            Some(TypeTag::Group) => self.root.list(&self.path, filter),
            Some(_) => Ok(Vec::new()),
        }
    }

    /// Names of all children.
    pub fn keys(&self) -> Result<Vec<String>, Error> {
        self.child_names(ChildFilter::All)
    }

    pub fn group_names(&self) -> Result<Vec<String>, Error> {
        self.child_names(ChildFilter::Groups)
    }

    pub fn payload_names(&self) -> Result<Vec<String>, Error> {
        self.child_names(ChildFilter::Payloads)
    }

    /// Copy `source` (from any root) to the child `name` of this group.
    ///
    /// Attributes, payloads and sub-groups are copied depth-first; each
    /// copied group's attributes are stored once.
    pub fn put_entry<S: Backend>(
        &self,
        name: &str,
        source: &Entry<'_, S>,
        options: PutOptions,
    ) -> Result<(), Error> {
        self.check_valid()?;
        source.check_valid()?;
        let target = self.path.child(name)?;
        self.root.check_writable(&target, "put")?;

        let tag = source
            .root
            .stored_type(source.path())?
            .ok_or_else(|| Error::not_found(source.path()))?;

        let same_root = std::ptr::eq(
            self.root as *const Root<B> as *const (),
            source.root as *const Root<S> as *const (),
        );
        if same_root && target.has_prefix(source.path()) {
            return Err(PathError::invalid(format!(
                "cannot copy '{}' into itself at '{}'",
                source.path, target
            ))
            .into());
        }
        if same_root && source.path().has_prefix(&target) {
            return Err(PathError::invalid(format!(
                "cannot replace '{}' with its own descendant '{}'",
                target, source.path
            ))
            .into());
        }
        let moving = options.delete_source && !source.is_root();
        if moving {
            source.root.check_delete(source.path())?;
        }

        self.root.ensure_group(&self.path)?;
        if self.root.stored_type(&target)?.is_some() {
            if !options.overwrite {
                return Err(Error::already_exists(&target, "use overwrite to replace it"));
            }
            self.root.check_overwrite(&target, "put")?;
            self.root.delete_recursive(&target, false)?;
        }

        log::debug!("copying '{}' to '{}'", source.path, target);
        self.root.copy_node(&target, source, tag)?;

        if moving {
            source.delete()?;
        }
        Ok(())
    }

    /// Delete the child called `name` and everything below it.
    pub fn delete_entry(&self, name: &str) -> Result<(), Error> {
        self.child(name)?.delete()
    }

    /// Delete this entry and everything below it.
    ///
    /// Every handle created earlier for this path or a descendant becomes
    /// invalidated.
    pub fn delete(&self) -> Result<(), Error> {
        self.check_valid()?;
        if self.is_root() {
            return Err(PathError::invalid("the root entry cannot be deleted").into());
        }
        self.root.check_delete(&self.path)?;
        self.root.delete_recursive(&self.path, true)
    }

    /// The attributes of this entry.
    pub fn attrs(&self) -> AttributeEntry<'r, B> {
        AttributeEntry::new(self.clone())
    }
}

impl<B: Backend> Clone for Entry<'_, B> {
    fn clone(&self) -> Self {
        Entry {
            root: self.root,
            path: self.path.clone(),
            born: self.born,
        }
    }
}

impl<B: Backend> PartialEq for Entry<'_, B> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.root, other.root) && self.path == other.path
    }
}

impl<B: Backend> Eq for Entry<'_, B> {}

impl<B: Backend> fmt::Debug for Entry<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path.to_string())
            .field("born", &self.born)
            .finish()
    }
}

impl<B: Backend> fmt::Display for Entry<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MapBackend;
    use collection_literals::btree;

    fn store(mode: OpenMode) -> Root<MapBackend> {
        Root::new(MapBackend::new(mode))
    }

    fn ints(values: &[i32]) -> NdArray {
        NdArray::from_vec(values.to_vec())
    }

    #[test]
    fn handles_are_lazy() {
        let root = store(OpenMode::ReadWrite);
        let entry = root.at("a/b/c").unwrap();
        assert_eq!(entry.state().unwrap(), EntryState::Detached);
        assert!(!entry.exists().unwrap());
        assert!(matches!(entry.type_tag(), Err(Error::EntryNotFound { .. })));
        assert!(root.entry().keys().unwrap().is_empty());
    }

    #[test]
    fn navigation_is_path_arithmetic() {
        let root = store(OpenMode::ReadWrite);
        let b = root.at("a/b").unwrap();
        assert_eq!(b.at("../c").unwrap().path().to_string(), "a/c");
        assert_eq!(b.at("/x").unwrap().path().to_string(), "x");
        assert_eq!(b.at("").unwrap(), b);
        assert_eq!(b.parent(), root.at("a").unwrap());
        assert_eq!(root.entry().parent(), root.entry());
        assert_eq!(b.child("d").unwrap().name(), Some("d"));
        assert_eq!(b.to_string(), "/a/b");
        assert!(b.at("../../..").is_err());
    }

    #[test]
    fn dataset_roundtrip_and_type_guard() {
        let root = store(OpenMode::ReadWrite);
        let entry = root.at("a/b").unwrap();
        entry.write_dataset(&ints(&[1, 2, 3])).unwrap();

        assert_eq!(entry.type_tag().unwrap(), TypeTag::Dataset);
        assert_eq!(entry.state().unwrap(), EntryState::Live);
        assert_eq!(entry.read_dataset().unwrap().to_vec::<i32>().unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            entry.read_table(),
            Err(Error::TypeMismatch { expected: TypeTag::Table, .. })
        ));
        assert_eq!(root.at("a").unwrap().type_tag().unwrap(), TypeTag::Group);
    }

    #[test]
    fn array_attributes_live_on_parent() {
        let root = store(OpenMode::ReadWrite);
        root.at("a/b").unwrap().write_dataset(&ints(&[1, 2, 3])).unwrap();

        let attrs = root.at("a").unwrap().attrs();
        assert_eq!(attrs.get("b/shape").unwrap(), Value::from(vec![3usize]));
        assert_eq!(attrs.get("b/dtype").unwrap(), Value::from("int32"));
        assert!(attrs.contains("b/byteorder").unwrap());
        // One batch for the three keys.
        assert_eq!(root.with_backend(|b| b.attribute_writes), 1);
    }

    #[test]
    fn replacing_array_clears_array_attributes() {
        let root = store(OpenMode::ReadWrite);
        let entry = root.at("a/b").unwrap();
        entry.write_dataset(&ints(&[1])).unwrap();
        entry.write_binary(Bytes::from_static(b"raw")).unwrap();

        assert_eq!(entry.type_tag().unwrap(), TypeTag::Binary);
        assert!(!root.at("a").unwrap().attrs().contains("b").unwrap());
        // Type-change overwrite keeps the handle usable.
        assert_eq!(entry.read_binary().unwrap(), Bytes::from_static(b"raw"));
    }

    #[test]
    fn wrong_variant_for_slot_is_type_mismatch() {
        let root = store(OpenMode::ReadWrite);
        let entry = root.at("t").unwrap();
        let value = PayloadValue::Binary(Bytes::new());
        assert!(matches!(
            entry.write(TypeTag::Table, &value),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            entry.write(TypeTag::Group, &value),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(!entry.exists().unwrap());
    }

    #[test]
    fn payload_at_root_is_invalid() {
        let root = store(OpenMode::ReadWrite);
        assert!(matches!(
            root.entry().write_binary(Bytes::new()),
            Err(Error::Path(PathError::Invalid { .. }))
        ));
    }

    #[test]
    fn payload_ancestor_blocks_write() {
        let root = store(OpenMode::ReadWrite);
        root.at("a").unwrap().write_binary(Bytes::new()).unwrap();
        assert!(matches!(
            root.at("a/b").unwrap().write_binary(Bytes::new()),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn delete_invalidates_old_handles() {
        let root = store(OpenMode::ReadWrite);
        let group = root.at("g").unwrap();
        let leaf = root.at("g/sub/leaf").unwrap();
        leaf.write_keyvalue(&btree! { "k".to_string() => Value::from(1i64) })
            .unwrap();

        root.entry().delete_entry("g").unwrap();

        assert!(!root.at("g").unwrap().exists().unwrap());
        assert_eq!(group.state().unwrap(), EntryState::Invalidated);
        assert!(matches!(group.exists(), Err(Error::InvalidatedEntry { .. })));
        assert!(matches!(leaf.read_keyvalue(), Err(Error::InvalidatedEntry { .. })));

        // A handle created after the delete is fresh.
        let fresh = root.at("g").unwrap();
        assert_eq!(fresh.state().unwrap(), EntryState::Detached);
        fresh.create_group().unwrap();
        assert_eq!(fresh.state().unwrap(), EntryState::Live);
    }

    #[test]
    fn delete_removes_array_attributes() {
        let root = store(OpenMode::ReadWrite);
        root.at("a/b").unwrap().write_dataset(&ints(&[1])).unwrap();
        root.at("a").unwrap().delete_entry("b").unwrap();
        assert!(root.at("a").unwrap().attrs().keys().unwrap().is_empty());
    }

    #[test]
    fn ancestor_delete_replaces_descendant_tombstones() {
        let root = store(OpenMode::ReadWrite);
        let mut stale = Vec::new();
        for name in ["x", "y", "z"] {
            let entry = root.at("g").unwrap().child(name).unwrap();
            entry.write_binary(Bytes::from_static(b"v")).unwrap();
            stale.push(entry.clone());
            entry.delete().unwrap();
            entry.write_binary(Bytes::from_static(b"w")).unwrap_err();
        }
        let survivor = root.at("g/x").unwrap();
        survivor.write_binary(Bytes::from_static(b"again")).unwrap();
        root.at("other").unwrap().create_group().unwrap();
        root.entry().delete_entry("other").unwrap();
        assert_eq!(root.tombstones.borrow().len(), 4);

        root.entry().delete_entry("g").unwrap();
        assert_eq!(root.tombstones.borrow().len(), 2);
        for entry in stale.iter().chain([&survivor]) {
            assert!(matches!(
                entry.exists(),
                Err(Error::InvalidatedEntry { .. })
            ));
        }
        assert!(!root.at("g/x").unwrap().exists().unwrap());
    }

    #[test]
    fn delete_rules() {
        let root = store(OpenMode::ReadWrite);
        assert!(matches!(root.entry().delete(), Err(Error::Path(_))));
        assert!(matches!(
            root.entry().delete_entry("missing"),
            Err(Error::EntryNotFound { .. })
        ));
    }

    #[test]
    fn append_mode_refuses_existing_entries() {
        let root = store(OpenMode::Append);
        let entry = root.at("a").unwrap();
        entry.write_binary(Bytes::from_static(b"1")).unwrap();
        assert!(matches!(
            entry.write_binary(Bytes::from_static(b"2")),
            Err(Error::ReadOnlyViolation { .. })
        ));
        root.at("b").unwrap().write_binary(Bytes::from_static(b"2")).unwrap();
        assert!(matches!(entry.delete(), Err(Error::ReadOnlyViolation { .. })));
    }

    #[test]
    fn read_mode_refuses_mutations() {
        let root = store(OpenMode::Read);
        assert!(matches!(
            root.at("a").unwrap().write_binary(Bytes::new()),
            Err(Error::ReadOnlyViolation { .. })
        ));
        assert!(matches!(
            root.at("g").unwrap().create_group(),
            Err(Error::ReadOnlyViolation { .. })
        ));
    }

    #[test]
    fn listing_filters_children() {
        let root = store(OpenMode::ReadWrite);
        root.at("g1").unwrap().create_group().unwrap();
        root.at("d").unwrap().write_dataset(&ints(&[1])).unwrap();
        root.at("g2").unwrap().create_group().unwrap();

        assert_eq!(root.entry().keys().unwrap(), vec!["g1", "d", "g2"]);
        assert_eq!(root.entry().group_names().unwrap(), vec!["g1", "g2"]);
        assert_eq!(root.entry().payload_names().unwrap(), vec!["d"]);
        assert!(root.at("d").unwrap().keys().unwrap().is_empty());
        assert_eq!(root.entry().children(ChildFilter::Groups).unwrap().len(), 2);
    }

    #[test]
    fn put_entry_copies_subtree() {
        let root = store(OpenMode::ReadWrite);
        let src = root.at("src").unwrap();
        src.attrs().set("owner", "me").unwrap();
        src.at("data").unwrap().write_dataset(&ints(&[4, 5])).unwrap();
        src.at("nested/blob").unwrap().write_binary(Bytes::from_static(b"b")).unwrap();

        root.entry()
            .put_entry("dst", &src, PutOptions::default())
            .unwrap();

        let dst = root.at("dst").unwrap();
        assert_eq!(dst.attrs().get("owner").unwrap(), Value::from("me"));
        assert_eq!(dst.attrs().get("data/shape").unwrap(), Value::from(vec![2usize]));
        assert_eq!(
            dst.at("data").unwrap().read_dataset().unwrap().to_vec::<i32>().unwrap(),
            vec![4, 5]
        );
        assert_eq!(
            dst.at("nested/blob").unwrap().read_binary().unwrap(),
            Bytes::from_static(b"b")
        );
        assert!(src.exists().unwrap());
    }

    #[test]
    fn put_entry_respects_overwrite_and_moves() {
        let root = store(OpenMode::ReadWrite);
        let src = root.at("src").unwrap();
        src.write_binary(Bytes::from_static(b"new")).unwrap();
        root.at("dst").unwrap().write_binary(Bytes::from_static(b"old")).unwrap();

        assert!(matches!(
            root.entry().put_entry("dst", &src, PutOptions::default()),
            Err(Error::AlreadyExists { .. })
        ));

        root.entry()
            .put_entry(
                "dst",
                &src,
                PutOptions {
                    overwrite: true,
                    delete_source: true,
                },
            )
            .unwrap();
        assert_eq!(
            root.at("dst").unwrap().read_binary().unwrap(),
            Bytes::from_static(b"new")
        );
        assert!(!root.at("src").unwrap().exists().unwrap());
    }

    #[test]
    fn put_entry_into_itself_fails() {
        let root = store(OpenMode::ReadWrite);
        let src = root.at("a").unwrap();
        src.create_group().unwrap();
        assert!(src.put_entry("copy", &src, PutOptions::default()).is_err());
    }

    #[test]
    fn put_entry_over_own_ancestor_keeps_source() {
        let root = store(OpenMode::ReadWrite);
        let inner = root.at("a/b").unwrap();
        inner.write_binary(Bytes::from_static(b"keep")).unwrap();

        let result = root.entry().put_entry(
            "a",
            &inner,
            PutOptions {
                overwrite: true,
                delete_source: false,
            },
        );
        assert!(matches!(result, Err(Error::Path(PathError::Invalid { .. }))));
        assert_eq!(root.at("a").unwrap().type_tag().unwrap(), TypeTag::Group);
        assert_eq!(inner.read_binary().unwrap(), Bytes::from_static(b"keep"));
    }

    #[test]
    fn move_in_append_mode_is_refused_before_copying() {
        let root = store(OpenMode::Append);
        let src = root.at("src").unwrap();
        src.write_binary(Bytes::from_static(b"s")).unwrap();

        let result = root.entry().put_entry(
            "dst",
            &src,
            PutOptions {
                overwrite: false,
                delete_source: true,
            },
        );
        assert!(matches!(result, Err(Error::ReadOnlyViolation { .. })));
        assert!(!root.at("dst").unwrap().exists().unwrap());
        assert!(src.exists().unwrap());

        // A plain copy is still allowed.
        root.entry()
            .put_entry("dst", &src, PutOptions::default())
            .unwrap();
        assert!(root.at("dst").unwrap().exists().unwrap());
    }

    #[test]
    fn put_entry_across_roots() {
        let first = store(OpenMode::ReadWrite);
        let second = store(OpenMode::ReadWrite);
        first.at("x/y").unwrap().write_binary(Bytes::from_static(b"z")).unwrap();
        first.entry().attrs().set("title", "first").unwrap();

        second
            .entry()
            .put_entry("copied", &first.at("x").unwrap(), PutOptions::default())
            .unwrap();
        assert_eq!(
            second.at("copied/y").unwrap().read_binary().unwrap(),
            Bytes::from_static(b"z")
        );

        second.update_from(&first).unwrap();
        assert!(second.at("x/y").unwrap().exists().unwrap());
        assert_eq!(second.entry().attrs().get("title").unwrap(), Value::from("first"));
    }

    #[test]
    fn close_and_drop_close_backend() {
        let root = store(OpenMode::ReadWrite);
        assert!(!root.with_backend(|b| b.closed));
        root.close().unwrap();
    }
}
