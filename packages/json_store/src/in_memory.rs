//! In-memory backend and its driver.
//!
//! Payloads still go through the codecs, so the in-memory store exercises
//! exactly what a file-backed store would persist. Trees are shared through
//! [`MemoryDriver`] by name, which gives `memory:` URIs the same open-mode
//! behaviour as directories on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use entrystore_core::backend::{ensure_writable, Backend, ChildFilter};
use entrystore_core::{
    CodecSet, Driver, Error, OpenMode, Path, PathError, PayloadMeta, PayloadValue, TypeTag,
    Value,
};

#[derive(Clone, Debug)]
struct MemNode {
    tag: TypeTag,
    attributes: Value,
    payload: Option<(Bytes, PayloadMeta)>,
    children: Vec<(String, MemNode)>,
}

impl MemNode {
    fn group() -> Self {
        MemNode {
            tag: TypeTag::Group,
            attributes: Value::map(),
            payload: None,
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&MemNode> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut MemNode> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    fn find(&self, path: &Path) -> Option<&MemNode> {
        let mut cursor = self;
        for component in path.iter() {
            cursor = cursor.child(component)?;
        }
        Some(cursor)
    }

    fn find_mut(&mut self, path: &Path) -> Option<&mut MemNode> {
        let mut cursor = self;
        for component in path.iter() {
            cursor = cursor.child_mut(component)?;
        }
        Some(cursor)
    }
}

/// Counters of physical writes, shared by every clone.
#[derive(Clone, Debug, Default)]
pub struct WriteStats {
    attribute_writes: Arc<AtomicUsize>,
    payload_writes: Arc<AtomicUsize>,
}

impl WriteStats {
    /// Number of `store_attributes` calls that reached the tree.
    pub fn attribute_writes(&self) -> usize {
        self.attribute_writes.load(Ordering::SeqCst)
    }

    /// Number of `write_payload` calls that reached the tree.
    pub fn payload_writes(&self) -> usize {
        self.payload_writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attribute_writes.store(0, Ordering::SeqCst);
        self.payload_writes.store(0, Ordering::SeqCst);
    }
}

/// A named, shareable in-memory tree.
#[derive(Clone)]
struct SharedTree {
    root: Arc<Mutex<MemNode>>,
    stats: WriteStats,
}

impl SharedTree {
    fn new() -> Self {
        SharedTree {
            root: Arc::new(Mutex::new(MemNode::group())),
            stats: WriteStats::default(),
        }
    }
}

/// Backend holding the entry tree in memory.
///
/// # Example
///
/// ```rust
/// use entrystore_core::{NdArray, Root, TypeTag};
/// use entrystore_json_store::InMemoryBackend;
///
/// let backend = InMemoryBackend::new();
/// let stats = backend.stats();
/// let root = Root::new(backend);
///
/// let trace = root.at("runs/1/trace").unwrap();
/// trace.write_dataset(&NdArray::from_vec(vec![1i32, 2, 3])).unwrap();
/// assert_eq!(trace.type_tag().unwrap(), TypeTag::Dataset);
/// assert_eq!(stats.payload_writes(), 1);
/// ```
pub struct InMemoryBackend {
    name: String,
    mode: OpenMode,
    tree: SharedTree,
    codecs: CodecSet,
}

impl InMemoryBackend {
    /// A fresh, unnamed store opened for update.
    pub fn new() -> Self {
        Self::with_mode(OpenMode::ReadWrite)
    }

    /// A fresh, unnamed store opened with `mode`.
    pub fn with_mode(mode: OpenMode) -> Self {
        Self::from_tree("anonymous", mode, SharedTree::new())
    }

    fn from_tree(name: &str, mode: OpenMode, tree: SharedTree) -> Self {
        InMemoryBackend {
            name: name.to_string(),
            mode,
            tree,
            codecs: CodecSet::default(),
        }
    }

    /// Replace the payload codecs.
    #[must_use]
    pub fn with_codecs(mut self, codecs: CodecSet) -> Self {
        self.codecs = codecs;
        self
    }

    /// Write counters of the underlying tree.
    pub fn stats(&self) -> WriteStats {
        self.tree.stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemNode> {
        self.tree.root.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The parent group of a non-root `path` and the child's name.
    fn parent_of<'t, 'p>(
        root: &'t mut MemNode,
        path: &'p Path,
    ) -> Result<(&'p str, &'t mut MemNode), Error> {
        let (Some(parent_path), Some(name)) = (path.parent(), path.name()) else {
            return Err(PathError::invalid("the store root has no parent").into());
        };
        let parent = root
            .find_mut(&parent_path)
            .ok_or_else(|| Error::not_found(&parent_path))?;
        if parent.tag != TypeTag::Group {
            return Err(Error::already_exists(
                &parent_path,
                format!("parent is a {}, not a group", parent.tag),
            ));
        }
        Ok((name, parent))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for InMemoryBackend {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error> {
        self.lock()
            .find(path)
            .map(|node| node.tag)
            .ok_or_else(|| Error::not_found(path))
    }

    fn create_node(&mut self, path: &Path, tag: TypeTag) -> Result<(), Error> {
        ensure_writable(self.mode, path, "create")?;
        if tag != TypeTag::Group {
            return Err(Error::unsupported(
                self.describe(),
                format!("create_node for {} (write the payload instead)", tag),
            ));
        }
        if path.is_root() {
            return Ok(());
        }
        let mut root = self.lock();
        let (name, parent) = Self::parent_of(&mut root, path)?;
        match parent.child(name) {
            Some(node) if node.tag == TypeTag::Group => Ok(()),
            Some(node) => Err(Error::already_exists(path, format!("{} stored here", node.tag))),
            None => {
                parent.children.push((name.to_string(), MemNode::group()));
                Ok(())
            }
        }
    }

    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error> {
        let (bytes, meta) = {
            let root = self.lock();
            let node = root.find(path).ok_or_else(|| Error::not_found(path))?;
            if node.tag != tag {
                return Err(Error::TypeMismatch {
                    path: path.to_string(),
                    expected: tag,
                    found: node.tag.to_string(),
                });
            }
            node.payload
                .clone()
                .ok_or_else(|| Error::metadata(path, "payload node without data"))?
        };
        self.codecs.decode(tag, &bytes, &meta)
    }

    fn write_payload(
        &mut self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        ensure_writable(self.mode, path, "write")?;
        let encoded = self.codecs.encode(tag, value)?;
        let mut root = self.lock();
        let (name, parent) = Self::parent_of(&mut root, path)?;
        let payload = Some((encoded.bytes, encoded.meta));
        match parent.child_mut(name) {
            Some(node) if node.tag == TypeTag::Group => {
                return Err(Error::already_exists(path, "a group is stored here"))
            }
            Some(node) => {
                node.tag = tag;
                node.payload = payload;
            }
            None => {
                let mut node = MemNode::group();
                node.tag = tag;
                node.payload = payload;
                parent.children.push((name.to_string(), node));
            }
        }
        self.tree.stats.payload_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_node(&mut self, path: &Path) -> Result<(), Error> {
        ensure_writable(self.mode, path, "delete")?;
        let mut root = self.lock();
        let (name, parent) = Self::parent_of(&mut root, path)?;
        let index = parent
            .children
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::not_found(path))?;
        if !parent.children[index].1.children.is_empty() {
            return Err(Error::already_exists(path, "group is not empty"));
        }
        parent.children.remove(index);
        Ok(())
    }

    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        let root = self.lock();
        let node = root.find(path).ok_or_else(|| Error::not_found(path))?;
        if node.tag != TypeTag::Group {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: TypeTag::Group,
                found: node.tag.to_string(),
            });
        }
        Ok(node
            .children
            .iter()
            .filter(|(_, child)| filter.matches(child.tag))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error> {
        self.lock()
            .find(path)
            .map(|node| node.attributes.clone())
            .ok_or_else(|| Error::not_found(path))
    }

    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error> {
        ensure_writable(self.mode, path, "store attributes")?;
        let mut root = self.lock();
        let node = root.find_mut(path).ok_or_else(|| Error::not_found(path))?;
        node.attributes = attributes.clone();
        self.tree
            .stats
            .attribute_writes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        log::debug!("Closing {}", self.describe());
        Ok(())
    }
}

const MEMORY_SCHEME: &str = "memory:";

/// Opens named in-memory stores from `memory:<name>` URIs.
///
/// Stores live as long as the driver, so a store written through one root
/// can be reopened by name.
#[derive(Default)]
pub struct MemoryDriver {
    stores: Mutex<HashMap<String, SharedTree>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_name(uri: &str) -> Result<&str, Error> {
        let name = uri
            .strip_prefix(MEMORY_SCHEME)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| Error::UnsupportedPath {
                protocol: "memory".to_string(),
                uri: uri.to_string(),
            })?;
        if name.is_empty() {
            return Err(PathError::invalid(format!("'{}' names no store", uri)).into());
        }
        Ok(name)
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<String, SharedTree>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write counters of the store called `name`.
    pub fn stats(&self, name: &str) -> Option<WriteStats> {
        self.stores().get(name).map(|tree| tree.stats.clone())
    }

    /// Forget the store called `name`; open backends keep their tree.
    pub fn remove(&self, name: &str) -> bool {
        self.stores().remove(name).is_some()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn accepts_path(&self, uri: &str) -> bool {
        uri.starts_with(MEMORY_SCHEME)
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn Backend>, Error> {
        let name = Self::store_name(uri)?;
        let mut stores = self.stores();
        let tree = match (mode, stores.get(name)) {
            (OpenMode::Read | OpenMode::ReadWrite, Some(tree)) => tree.clone(),
            (OpenMode::Read | OpenMode::ReadWrite, None) => return Err(Error::not_found(uri)),
            (OpenMode::Append, Some(tree)) => tree.clone(),
            (OpenMode::Exclusive, Some(_)) => {
                return Err(Error::already_exists(
                    uri,
                    "exclusive create of an existing store",
                ))
            }
            (OpenMode::Append | OpenMode::Exclusive | OpenMode::Write, _) => {
                let tree = SharedTree::new();
                stores.insert(name.to_string(), tree.clone());
                tree
            }
        };
        log::debug!("Opened memory store '{}' (mode '{}')", name, mode);
        Ok(Box::new(InMemoryBackend::from_tree(name, mode, tree)))
    }
}
