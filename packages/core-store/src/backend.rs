//! The storage backend contract.
//!
//! A [`Backend`] maps the virtual entry tree onto physical storage and keeps
//! each node's metadata (type tag, array dtype/shape/byte order) consistent
//! with what is actually stored. Backends expose primitives only; overwrite,
//! append-mode and parent-creation rules live in the entry layer so every
//! backend obeys them the same way.

use crate::{Error, OpenMode, Path, PayloadValue, TypeTag, Value};

/// Which children [`Backend::list_children`] returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildFilter {
    All,
    Groups,
    Payloads,
}

impl ChildFilter {
    pub fn matches(&self, tag: TypeTag) -> bool {
        match self {
            ChildFilter::All => true,
            ChildFilter::Groups => !tag.is_payload(),
            ChildFilter::Payloads => tag.is_payload(),
        }
    }
}

/// Physical storage for one entry tree.
///
/// Paths are always normalized and relative to the store root. The root
/// itself is a group that always exists while the backend is open.
///
/// # Object Safety
///
/// This trait is object-safe: drivers hand out `Box<dyn Backend>`.
pub trait Backend: Send {
    /// Short human-readable description, e.g. `file:/data/run1`.
    fn describe(&self) -> String;

    fn mode(&self) -> OpenMode;

    /// Whether a node exists at `path`, optionally of the `expected` type.
    fn exists(&mut self, path: &Path, expected: Option<TypeTag>) -> Result<bool, Error> {
        match self.type_of(path) {
            Ok(tag) => Ok(expected.map_or(true, |expected| expected == tag)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The stored type of the node at `path`.
    ///
    /// Fails with `EntryNotFound` if nothing is stored there.
    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error>;

    /// Create an empty group at `path`; the parent must already be a group.
    ///
    /// Creating a group where a group already exists is a no-op. Payload
    /// nodes are created by [`Backend::write_payload`], so any payload tag is
    /// rejected.
    fn create_node(&mut self, path: &Path, tag: TypeTag) -> Result<(), Error>;

    /// Decode the payload at `path`, which must be stored as `tag`.
    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error>;

    /// Encode `value` with the codec for `tag` and store it at `path`,
    /// recording the payload metadata in the same call.
    ///
    /// An existing payload node is replaced; an existing group is
    /// `AlreadyExists`.
    fn write_payload(&mut self, path: &Path, tag: TypeTag, value: &PayloadValue)
        -> Result<(), Error>;

    /// Remove the node at `path` and its metadata record.
    ///
    /// Groups must be empty; callers delete descendants first.
    fn delete_node(&mut self, path: &Path) -> Result<(), Error>;

    /// Names of the children of the group at `path`, in discovery order.
    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error>;

    /// The attribute map of the node at `path` (an empty map if none).
    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error>;

    /// Replace the attribute map of the node at `path`.
    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error>;

    /// Flush and release the physical handle.
    fn close(&mut self) -> Result<(), Error>;
}

// Blanket implementations for boxes and references

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn mode(&self) -> OpenMode {
        (**self).mode()
    }

    fn exists(&mut self, path: &Path, expected: Option<TypeTag>) -> Result<bool, Error> {
        (**self).exists(path, expected)
    }

    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error> {
        (**self).type_of(path)
    }

    fn create_node(&mut self, path: &Path, tag: TypeTag) -> Result<(), Error> {
        (**self).create_node(path, tag)
    }

    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error> {
        (**self).read_payload(path, tag)
    }

    fn write_payload(
        &mut self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        (**self).write_payload(path, tag, value)
    }

    fn delete_node(&mut self, path: &Path) -> Result<(), Error> {
        (**self).delete_node(path)
    }

    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        (**self).list_children(path, filter)
    }

    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error> {
        (**self).load_attributes(path)
    }

    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error> {
        (**self).store_attributes(path, attributes)
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn mode(&self) -> OpenMode {
        (**self).mode()
    }

    fn exists(&mut self, path: &Path, expected: Option<TypeTag>) -> Result<bool, Error> {
        (**self).exists(path, expected)
    }

    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error> {
        (**self).type_of(path)
    }

    fn create_node(&mut self, path: &Path, tag: TypeTag) -> Result<(), Error> {
        (**self).create_node(path, tag)
    }

    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error> {
        (**self).read_payload(path, tag)
    }

    fn write_payload(
        &mut self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        (**self).write_payload(path, tag, value)
    }

    fn delete_node(&mut self, path: &Path) -> Result<(), Error> {
        (**self).delete_node(path)
    }

    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        (**self).list_children(path, filter)
    }

    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error> {
        (**self).load_attributes(path)
    }

    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error> {
        (**self).store_attributes(path, attributes)
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

/// `ReadOnlyViolation` unless `mode` permits writing.
pub fn ensure_writable(mode: OpenMode, path: &Path, operation: &str) -> Result<(), Error> {
    if mode.is_writable() {
        Ok(())
    } else {
        Err(Error::read_only(
            path,
            format!("{} refused: store opened with mode '{}'", operation, mode),
        ))
    }
}
