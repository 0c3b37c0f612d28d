//! Reference backends for entrystore.
//!
//! - [`LocalDiskBackend`]: directories, suffixed payload files and a
//!   `.entry.json` metadata file per group
//! - [`InMemoryBackend`]: a shared in-memory tree with write counters
//!
//! Both come with a [`Driver`](entrystore_core::Driver) so they can be
//! registered by protocol name (`file`, `memory`).

pub mod in_memory;
pub mod local_disk;
pub mod metadata;

pub use in_memory::{InMemoryBackend, MemoryDriver, WriteStats};
pub use local_disk::{IntegrityReport, LocalDiskBackend, LocalDiskDriver};
pub use metadata::{DirectoryMetadata, EntryRecord, METADATA_FILE};
