//! Core entrystore: hierarchical, path-addressed entries over a backend
//!
//! This layer defines the entry tree and everything a backend must honour:
//! - `Path`: Slash-delimited addresses with `.`/`..` resolution
//! - `Value`: Dynamically typed tree used for attributes and key-value payloads
//! - `TypeTag` / `PayloadValue`: What a typed slot holds
//! - `Backend`: The storage contract every driver satisfies
//! - `Root` / `Entry`: Lazy handles with type-guarded reads, writes and deletes
//! - `AttributeEntry`: Per-entry attribute maps with batched commits
//! - `Registry`: Ordered protocol drivers that open backends from URIs
//!
//! # Example
//!
//! ```rust,ignore
//! use entrystore_core::{NdArray, Root, TypeTag};
//!
//! let root = Root::new(backend);
//! let trace = root.at("runs/1/trace")?;
//! trace.write_dataset(&NdArray::from_vec(vec![1i32, 2, 3]))?;
//! assert_eq!(trace.type_tag()?, TypeTag::Dataset);
//! assert_eq!(root.at("runs/1")?.attrs().get("trace/dtype")?, "int32".into());
//! ```

pub use bytes::Bytes;

pub mod attrs;
pub mod backend;
pub mod codec;
mod entry;
mod error;
mod mode;
mod path;
pub mod payload;
pub mod registry;
mod type_tag;
mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use attrs::{AttrTransaction, AttributeEntry};
pub use backend::{Backend, ChildFilter};
pub use codec::{Codec, CodecSet, Encoded, PayloadMeta};
pub use entry::{Entry, EntryState, PutOptions, Root};
pub use error::Error;
pub use mode::OpenMode;
pub use path::{Path, PathError, PathSpec};
pub use payload::{ByteOrder, DType, Element, NdArray, PayloadValue, Table};
pub use registry::{Driver, NullBackend, NullDriver, Priority, Registry};
pub use type_tag::TypeTag;
pub use value::Value;
