//! entrystore: hierarchical, path-addressed storage of typed payloads and
//! attributes.
//!
//! Every store is a tree of entries. Groups hold children; payload entries
//! hold an array, image, table, key-value map or raw bytes; every entry
//! carries a map of attributes. Stores are opened by URI through a registry
//! of protocol drivers:
//!
//! ```rust,no_run
//! use entrystore::{NdArray, OpenMode};
//!
//! # fn main() -> Result<(), entrystore::Error> {
//! let root = entrystore::open("/tmp/experiment", OpenMode::Append)?;
//! let trace = root.at("runs/1/trace")?;
//! trace.write_dataset(&NdArray::from_vec(vec![1i32, 2, 3]))?;
//! trace.attrs().set("units", "mV")?;
//! root.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The process-wide registry knows the `memory` and `file` protocols. Set
//! `ENTRYSTORE_PROTOCOL` to force one protocol for every [`open`] call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;

pub use entrystore_core::*;
pub use entrystore_json_store::{
    InMemoryBackend, IntegrityReport, LocalDiskBackend, LocalDiskDriver, MemoryDriver, WriteStats,
};

mod config;

pub use config::StoreConfig;

/// Name of the environment variable naming a protocol for [`open`].
pub const PROTOCOL_ENV: &str = "ENTRYSTORE_PROTOCOL";

/// A store opened through the registry.
pub type DynRoot = Root<Box<dyn Backend>>;

lazy_static! {
    static ref REGISTRY: Mutex<Registry> = Mutex::new(default_registry());
}

/// A fresh registry holding the `memory` driver followed by the `file`
/// driver.
///
/// `file` accepts any scheme-less path, so it goes last.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    let drivers: [Arc<dyn Driver>; 2] = [Arc::new(MemoryDriver::new()), Arc::new(LocalDiskDriver)];
    for driver in drivers {
        if let Err(e) = registry.register(driver, Priority::Last) {
            log::warn!("skipping default driver: {}", e);
        }
    }
    registry
}

/// The process-wide registry used by [`open`] and [`StoreConfig::open`].
pub fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open `uri` through the process-wide registry.
pub fn open(uri: &str, mode: OpenMode) -> Result<DynRoot, Error> {
    let protocol = std::env::var(PROTOCOL_ENV).ok();
    open_with(uri, mode, protocol.as_deref())
}

/// Open `uri` with an explicit protocol (`None` picks by URI).
pub fn open_with(uri: &str, mode: OpenMode, protocol: Option<&str>) -> Result<DynRoot, Error> {
    log::debug!(
        "Opening {} (mode '{}', protocol {:?})...",
        uri,
        mode,
        protocol
    );
    registry().open(uri, mode, protocol)
}
