//! The per-directory metadata document of [`crate::LocalDiskBackend`].
//!
//! ```json
//! {
//!   "attributes": {"owner": "me"},
//!   "entries": {
//!     "trace": {"file": "trace.array", "type": "dataset",
//!               "dtype": "int32", "shape": [3], "byteorder": "little"},
//!     "runs": {"file": "runs", "type": "group"}
//!   }
//! }
//! ```
//!
//! `entries` keeps insertion order, which is the discovery order reported by
//! `list_children`.

use std::{fmt, fs, io, path};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use entrystore_core::{Error, PayloadMeta, TypeTag, Value};

/// Name of the metadata file inside every group directory.
pub const METADATA_FILE: &str = ".entry.json";

/// What a directory knows about one child.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// File or directory name relative to the parent directory.
    pub file: String,
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(flatten)]
    pub meta: PayloadMeta,
    /// Attributes of a payload child; groups keep theirs in their own
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

impl EntryRecord {
    pub fn group(name: &str) -> Self {
        EntryRecord {
            file: name.to_string(),
            tag: TypeTag::Group,
            meta: PayloadMeta::default(),
            attributes: None,
        }
    }
}

/// Contents of one `.entry.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    #[serde(default = "Value::map")]
    pub attributes: Value,
    #[serde(
        default,
        serialize_with = "serialize_entries",
        deserialize_with = "deserialize_entries"
    )]
    pub entries: Vec<(String, EntryRecord)>,
}

impl Default for DirectoryMetadata {
    fn default() -> Self {
        DirectoryMetadata {
            attributes: Value::map(),
            entries: Vec::new(),
        }
    }
}

impl DirectoryMetadata {
    pub fn get(&self, name: &str) -> Option<&EntryRecord> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EntryRecord> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Insert or replace the record for `name`, keeping its position.
    pub fn put(&mut self, name: &str, record: EntryRecord) {
        match self.get_mut(name) {
            Some(existing) => *existing = record,
            None => self.entries.push((name.to_string(), record)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<EntryRecord> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// The entry (other than `name`) already stored in `file`, if any.
    pub fn owner_of_file(&self, file: &str, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, r)| r.file == file && n != name)
            .map(|(n, _)| n.as_str())
    }

    /// Read `dir/.entry.json`; `None` if the file does not exist.
    pub fn read_from(dir: &path::Path) -> Result<Option<Self>, Error> {
        let file_path = dir.join(METADATA_FILE);
        log::debug!("Reading {}...", file_path.display());
        let text = match fs::read(&file_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&text)
            .map(Some)
            .map_err(|e| Error::metadata(file_path.display(), e.to_string()))
    }

    /// Write `dir/.entry.json`.
    pub fn write_to(&self, dir: &path::Path) -> Result<(), Error> {
        let file_path = dir.join(METADATA_FILE);
        log::debug!("Writing {}...", file_path.display());
        let text = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::metadata(file_path.display(), e.to_string()))?;
        fs::write(&file_path, text)?;
        Ok(())
    }
}

fn serialize_entries<S>(entries: &[(String, EntryRecord)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (name, record) in entries {
        map.serialize_entry(name, record)?;
    }
    map.end()
}

fn deserialize_entries<'de, D>(deserializer: D) -> Result<Vec<(String, EntryRecord)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, EntryRecord)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of entry names to entry records")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries: Vec<(String, EntryRecord)> =
                Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, record)) = access.next_entry::<String, EntryRecord>()? {
                if entries.iter().any(|(n, _)| *n == name) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate entry name '{}'",
                        name
                    )));
                }
                entries.push((name, record));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}
