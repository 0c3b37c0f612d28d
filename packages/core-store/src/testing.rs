//! A minimal map-backed [`Backend`] for unit tests in this crate.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::backend::{ensure_writable, Backend, ChildFilter};
use crate::codec::{CodecSet, PayloadMeta};
use crate::{Error, OpenMode, Path, PayloadValue, TypeTag, Value};

struct Node {
    tag: TypeTag,
    attributes: Value,
    payload: Option<(Bytes, PayloadMeta)>,
    children: Vec<String>,
}

impl Node {
    fn new(tag: TypeTag) -> Self {
        Node {
            tag,
            attributes: Value::map(),
            payload: None,
            children: Vec::new(),
        }
    }
}

pub(crate) struct MapBackend {
    mode: OpenMode,
    codecs: CodecSet,
    nodes: BTreeMap<Path, Node>,
    pub attribute_writes: usize,
    pub closed: bool,
}

impl MapBackend {
    pub fn new(mode: OpenMode) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(Path::root(), Node::new(TypeTag::Group));
        MapBackend {
            mode,
            codecs: CodecSet::default(),
            nodes,
            attribute_writes: 0,
            closed: false,
        }
    }

    fn node(&self, path: &Path) -> Result<&Node, Error> {
        self.nodes.get(path).ok_or_else(|| Error::not_found(path))
    }

    fn node_mut(&mut self, path: &Path) -> Result<&mut Node, Error> {
        self.nodes.get_mut(path).ok_or_else(|| Error::not_found(path))
    }

    fn attach(&mut self, path: &Path, node: Node) -> Result<(), Error> {
        let parent = path.parent().ok_or_else(|| Error::already_exists(path, "root"))?;
        let name = path.name().unwrap_or_default().to_string();
        let parent_node = self.node_mut(&parent)?;
        if parent_node.tag != TypeTag::Group {
            return Err(Error::already_exists(&parent, "parent is not a group"));
        }
        parent_node.children.push(name);
        self.nodes.insert(path.clone(), node);
        Ok(())
    }
}

impl Backend for MapBackend {
    fn describe(&self) -> String {
        "map".to_string()
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error> {
        Ok(self.node(path)?.tag)
    }

    fn create_node(&mut self, path: &Path, tag: TypeTag) -> Result<(), Error> {
        ensure_writable(self.mode, path, "create")?;
        if tag != TypeTag::Group {
            return Err(Error::unsupported("map", "create_node for payloads"));
        }
        match self.nodes.get(path) {
            Some(node) if node.tag == TypeTag::Group => Ok(()),
            Some(_) => Err(Error::already_exists(path, "payload stored here")),
            None => self.attach(path, Node::new(TypeTag::Group)),
        }
    }

    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error> {
        let node = self.node(path)?;
        if node.tag != tag {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: tag,
                found: node.tag.to_string(),
            });
        }
        let (bytes, meta) = node
            .payload
            .as_ref()
            .ok_or_else(|| Error::not_found(path))?;
        self.codecs.decode(tag, bytes, meta)
    }

    fn write_payload(
        &mut self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        ensure_writable(self.mode, path, "write")?;
        let encoded = self.codecs.encode(tag, value)?;
        match self.nodes.get_mut(path) {
            Some(node) if node.tag == TypeTag::Group => {
                Err(Error::already_exists(path, "group stored here"))
            }
            Some(node) => {
                node.tag = tag;
                node.payload = Some((encoded.bytes, encoded.meta));
                Ok(())
            }
            None => {
                let mut node = Node::new(tag);
                node.payload = Some((encoded.bytes, encoded.meta));
                self.attach(path, node)
            }
        }
    }

    fn delete_node(&mut self, path: &Path) -> Result<(), Error> {
        ensure_writable(self.mode, path, "delete")?;
        if !self.node(path)?.children.is_empty() {
            return Err(Error::already_exists(path, "group is not empty"));
        }
        self.nodes.remove(path);
        if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
            self.node_mut(&parent)?.children.retain(|c| c != name);
        }
        Ok(())
    }

    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        let node = self.node(path)?;
        let mut names = Vec::new();
        for name in &node.children {
            let child = path.child(name)?;
            if filter.matches(self.node(&child)?.tag) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error> {
        Ok(self.node(path)?.attributes.clone())
    }

    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error> {
        ensure_writable(self.mode, path, "store attributes")?;
        self.node_mut(path)?.attributes = attributes.clone();
        self.attribute_writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}
