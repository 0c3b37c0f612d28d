//! Protocol drivers and the ordered registry that picks one for a URI.

use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, ChildFilter};
use crate::entry::Root;
use crate::{Error, OpenMode, Path, PayloadValue, TypeTag, Value};

/// Opens backends for one storage protocol.
pub trait Driver: Send + Sync {
    /// Protocol name, unique within a registry (e.g. `file`).
    fn name(&self) -> &str;

    /// Whether this driver can open `uri`.
    fn accepts_path(&self, uri: &str) -> bool;

    fn open(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn Backend>, Error>;
}

/// Where [`Registry::register`] inserts a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Consulted before every registered driver.
    First,
    /// Consulted after every registered driver.
    Last,
    /// Inserted at this index (clamped to the end).
    At(usize),
}

/// An ordered list of drivers; earlier drivers win when several accept a
/// URI.
#[derive(Clone, Default)]
pub struct Registry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>, priority: Priority) -> Result<(), Error> {
        if self.lookup(driver.name()).is_some() {
            return Err(Error::DuplicateProtocol(driver.name().to_string()));
        }
        let index = match priority {
            Priority::First => 0,
            Priority::Last => self.drivers.len(),
            Priority::At(index) => index.min(self.drivers.len()),
        };
        log::debug!("registered protocol '{}' at {}", driver.name(), index);
        self.drivers.insert(index, driver);
        Ok(())
    }

    /// Remove the driver called `name` and return it.
    pub fn unregister(&mut self, name: &str) -> Result<Arc<dyn Driver>, Error> {
        let index = self
            .drivers
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| Error::UnknownProtocol(name.to_string()))?;
        Ok(self.drivers.remove(index))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    /// Registered protocol names in priority order.
    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }

    /// The first driver accepting `uri`, or the [`NullDriver`].
    pub fn resolve_for_path(&self, uri: &str) -> Arc<dyn Driver> {
        match self.drivers.iter().find(|d| d.accepts_path(uri)) {
            Some(driver) => driver.clone(),
            None => {
                log::debug!("no protocol accepts '{}', using the null driver", uri);
                Arc::new(NullDriver)
            }
        }
    }

    /// Open `uri` and wrap the backend in a [`Root`].
    ///
    /// With an explicit `protocol` that driver must accept `uri`; otherwise
    /// the driver is picked by [`Registry::resolve_for_path`].
    pub fn open(
        &self,
        uri: &str,
        mode: OpenMode,
        protocol: Option<&str>,
    ) -> Result<Root<Box<dyn Backend>>, Error> {
        let driver = match protocol {
            Some(name) => {
                let driver = self
                    .lookup(name)
                    .ok_or_else(|| Error::UnknownProtocol(name.to_string()))?;
                if !driver.accepts_path(uri) {
                    return Err(Error::UnsupportedPath {
                        protocol: name.to_string(),
                        uri: uri.to_string(),
                    });
                }
                driver
            }
            None => self.resolve_for_path(uri),
        };
        let backend = driver.open(uri, mode)?;
        Ok(Root::new(backend))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// The fallback driver: accepts anything, opens a [`NullBackend`].
pub struct NullDriver;

impl Driver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn accepts_path(&self, _uri: &str) -> bool {
        true
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn Backend>, Error> {
        Ok(Box::new(NullBackend {
            uri: uri.to_string(),
            mode,
        }))
    }
}

/// A backend that supports no operation at all.
pub struct NullBackend {
    uri: String,
    mode: OpenMode,
}

impl NullBackend {
    fn refuse<T>(&self, operation: &str) -> Result<T, Error> {
        Err(Error::unsupported(self.describe(), operation))
    }
}

impl Backend for NullBackend {
    fn describe(&self) -> String {
        format!("null:{}", self.uri)
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn type_of(&mut self, _path: &Path) -> Result<TypeTag, Error> {
        self.refuse("type_of")
    }

    fn create_node(&mut self, _path: &Path, _tag: TypeTag) -> Result<(), Error> {
        self.refuse("create_node")
    }

    fn read_payload(&mut self, _path: &Path, _tag: TypeTag) -> Result<PayloadValue, Error> {
        self.refuse("read_payload")
    }

    fn write_payload(
        &mut self,
        _path: &Path,
        _tag: TypeTag,
        _value: &PayloadValue,
    ) -> Result<(), Error> {
        self.refuse("write_payload")
    }

    fn delete_node(&mut self, _path: &Path) -> Result<(), Error> {
        self.refuse("delete_node")
    }

    fn list_children(&mut self, _path: &Path, _filter: ChildFilter) -> Result<Vec<String>, Error> {
        self.refuse("list_children")
    }

    fn load_attributes(&mut self, _path: &Path) -> Result<Value, Error> {
        self.refuse("load_attributes")
    }

    fn store_attributes(&mut self, _path: &Path, _attributes: &Value) -> Result<(), Error> {
        self.refuse("store_attributes")
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
