use std::collections::HashMap;
use std::{ffi, fs, io, path};

use entrystore_core::backend::{ensure_writable, Backend, ChildFilter};
use entrystore_core::{
    CodecSet, Driver, Error, OpenMode, Path, PathError, PayloadValue, TypeTag, Value,
};

use crate::metadata::{DirectoryMetadata, EntryRecord, METADATA_FILE};

/// Filesystem backend: groups are directories, payloads are files, and each
/// directory describes its children in a `.entry.json` metadata file.
///
/// Metadata is cached per directory and written through on every change.
/// Children found on disk but missing from the metadata are added when the
/// directory is first loaded; the repaired metadata is persisted only when
/// the store is writable.
pub struct LocalDiskBackend {
    root: path::PathBuf,
    mode: OpenMode,
    codecs: CodecSet,
    directories: HashMap<Path, DirectoryMetadata>,
}

impl LocalDiskBackend {
    /// Open the store rooted at the directory `root`.
    ///
    /// - `r`, `r+`: the directory must exist
    /// - `a`: the directory is created if missing
    /// - `x`: the directory must not exist
    /// - `w`: an existing store is removed and recreated; a non-empty
    ///   directory without a metadata file is refused
    pub fn open(root: impl Into<path::PathBuf>, mode: OpenMode) -> Result<Self, Error> {
        let root = root.into();
        let exists = root.exists();
        match mode {
            OpenMode::Read | OpenMode::ReadWrite => {
                if !root.is_dir() {
                    return Err(Error::not_found(root.display()));
                }
            }
            OpenMode::Append => {
                if !exists {
                    fs::create_dir_all(&root)?;
                }
            }
            OpenMode::Exclusive => {
                if exists {
                    return Err(Error::already_exists(
                        root.display(),
                        "exclusive create of an existing location",
                    ));
                }
                fs::create_dir_all(&root)?;
            }
            OpenMode::Write => {
                if exists {
                    Self::clear(&root)?;
                }
                fs::create_dir_all(&root)?;
            }
        }

        if !root.is_dir() {
            return Err(Error::already_exists(
                root.display(),
                "store root is not a directory",
            ));
        }
        if mode.is_writable() && !root.join(METADATA_FILE).exists() {
            DirectoryMetadata::default().write_to(&root)?;
        }

        log::debug!("Opened local store {} (mode '{}')", root.display(), mode);
        Ok(LocalDiskBackend {
            root,
            mode,
            codecs: CodecSet::default(),
            directories: HashMap::new(),
        })
    }

    /// Replace the payload codecs.
    #[must_use]
    pub fn with_codecs(mut self, codecs: CodecSet) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn root_dir(&self) -> &path::Path {
        &self.root
    }

    fn clear(root: &path::Path) -> Result<(), Error> {
        let is_store = root.join(METADATA_FILE).exists();
        let is_empty = root.is_dir() && fs::read_dir(root)?.next().is_none();
        if !is_store && !is_empty {
            return Err(Error::already_exists(
                root.display(),
                "refusing to clear a directory that is not an entry store",
            ));
        }
        log::debug!("Removing {}...", root.display());
        fs::remove_dir_all(root)?;
        Ok(())
    }

    fn dir_path(&self, group: &Path) -> path::PathBuf {
        self.root
            .components()
            .chain(
                group
                    .iter()
                    .map(|s| path::Component::Normal(ffi::OsStr::new(s))),
            )
            .collect()
    }

    /// The metadata of the group directory `group`, loaded and repaired on
    /// first use.
    fn directory(&mut self, group: &Path) -> Result<&mut DirectoryMetadata, Error> {
        if !self.directories.contains_key(group) {
            let metadata = self.load_directory(group)?;
            self.directories.insert(group.clone(), metadata);
        }
        self.directories
            .get_mut(group)
            .ok_or_else(|| Error::metadata(group, "directory metadata vanished from cache"))
    }

    fn load_directory(&self, group: &Path) -> Result<DirectoryMetadata, Error> {
        let dir = self.dir_path(group);
        let mut metadata = DirectoryMetadata::read_from(&dir)?.unwrap_or_default();
        if self.repair(&dir, &mut metadata)? && self.mode.is_writable() {
            metadata.write_to(&dir)?;
        }
        Ok(metadata)
    }

    /// Record physical children that the metadata does not mention.
    fn repair(&self, dir: &path::Path, metadata: &mut DirectoryMetadata) -> Result<bool, Error> {
        let mut found = Vec::new();
        for dir_entry in fs::read_dir(dir)? {
            let dir_entry = dir_entry?;
            let Some(file) = dir_entry.file_name().to_str().map(str::to_string) else {
                log::warn!(
                    "Skipping non UTF-8 file name in {}: {:?}",
                    dir.display(),
                    dir_entry.file_name()
                );
                continue;
            };
            if file == METADATA_FILE || metadata.entries.iter().any(|(_, r)| r.file == file) {
                continue;
            }
            found.push((file, dir_entry.file_type()?.is_dir()));
        }
        // read_dir order is platform-dependent
        found.sort();

        let mut changed = false;
        for (file, is_dir) in found {
            let (name, tag) = if is_dir {
                (file.clone(), TypeTag::Group)
            } else {
                match self.codecs.classify_file(&file) {
                    Some((stem, tag)) => (stem.to_string(), tag),
                    None => (file.clone(), TypeTag::Binary),
                }
            };
            if metadata.get(&name).is_some() || Path::validate_name(&name).is_err() {
                log::warn!(
                    "Ignoring {} in {}: name '{}' is unusable or already taken",
                    file,
                    dir.display(),
                    name
                );
                continue;
            }
            if tag.is_array() {
                log::warn!(
                    "Found {} {} in {} without dtype/shape metadata; it cannot be read until rewritten",
                    tag,
                    file,
                    dir.display()
                );
            } else {
                log::warn!("Recording untracked {} {} in {}", tag, file, dir.display());
            }
            metadata.entries.push((
                name,
                EntryRecord {
                    file,
                    tag,
                    meta: Default::default(),
                    attributes: None,
                },
            ));
            changed = true;
        }
        Ok(changed)
    }

    fn save_directory(&mut self, group: &Path) -> Result<(), Error> {
        let dir = self.dir_path(group);
        let metadata = self.directory(group)?;
        metadata.write_to(&dir)
    }

    /// The record of the non-root entry at `path`, if its parent directory
    /// exists and lists it.
    fn record(&mut self, path: &Path) -> Result<Option<EntryRecord>, Error> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(None);
        };
        if !self.dir_path(&parent).is_dir() {
            return Ok(None);
        }
        if !parent.is_root() && self.record(&parent)?.map(|r| r.tag) != Some(TypeTag::Group) {
            return Ok(None);
        }
        Ok(self.directory(&parent)?.get(name).cloned())
    }

    /// Split a non-root `path` into its parent group and name, checking that
    /// the parent exists as a group.
    fn split_in_group<'p>(&mut self, path: &'p Path) -> Result<(Path, &'p str), Error> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(PathError::invalid("the store root has no parent").into());
        };
        match self.type_of(&parent)? {
            TypeTag::Group => Ok((parent, name)),
            other => Err(Error::already_exists(
                &parent,
                format!("parent is a {}, not a group", other),
            )),
        }
    }

    fn claim_file(&mut self, parent: &Path, name: &str, file: &str) -> Result<(), Error> {
        if file == METADATA_FILE {
            return Err(PathError::invalid(format!("'{}' is reserved", METADATA_FILE)).into());
        }
        if let Some(owner) = self.directory(parent)?.owner_of_file(file, name) {
            return Err(Error::already_exists(
                parent.child(name)?,
                format!("file '{}' already belongs to entry '{}'", file, owner),
            ));
        }
        Ok(())
    }

    /// Check the physical layout against every metadata file.
    pub fn check_integrity(&self) -> Result<IntegrityReport, Error> {
        let mut report = IntegrityReport::default();
        let walker = walkdir::WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir());
        for dir_entry in walker {
            let dir_entry = dir_entry.map_err(io::Error::from)?;
            let dir = dir_entry.path();
            let Some(metadata) = DirectoryMetadata::read_from(dir)? else {
                report.directories_without_metadata.push(dir.to_path_buf());
                continue;
            };
            for (_, record) in &metadata.entries {
                let file_path = dir.join(&record.file);
                let matches = match record.tag {
                    TypeTag::Group => file_path.is_dir(),
                    _ => file_path.is_file(),
                };
                if !matches {
                    report.missing_files.push(file_path);
                }
            }
            for child in fs::read_dir(dir)? {
                let child = child?;
                let file = child.file_name();
                let file = file.to_str();
                if file == Some(METADATA_FILE) {
                    continue;
                }
                let recorded =
                    file.is_some_and(|f| metadata.entries.iter().any(|(_, r)| r.file == f));
                if !recorded {
                    report.unrecorded_files.push(child.path());
                }
            }
        }
        report.unrecorded_files.sort();
        Ok(report)
    }
}

impl Backend for LocalDiskBackend {
    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn type_of(&mut self, path: &Path) -> Result<TypeTag, Error> {
        if path.is_root() {
            return Ok(TypeTag::Group);
        }
        self.record(path)?
            .map(|r| r.tag)
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
        let (parent, name) = self.split_in_group(path)?;
        match self.directory(&parent)?.get(name) {
            Some(record) if record.tag == TypeTag::Group => return Ok(()),
            Some(record) => {
                return Err(Error::already_exists(
                    path,
                    format!("{} stored here", record.tag),
                ))
            }
            None => {}
        }
        self.claim_file(&parent, name, name)?;

        let dir = self.dir_path(path);
        log::debug!("Creating {}...", dir.display());
        fs::create_dir_all(&dir)?;
        let metadata = DirectoryMetadata::default();
        metadata.write_to(&dir)?;
        self.directories.insert(path.clone(), metadata);

        self.directory(&parent)?.put(name, EntryRecord::group(name));
        self.save_directory(&parent)
    }

    fn read_payload(&mut self, path: &Path, tag: TypeTag) -> Result<PayloadValue, Error> {
        let record = self.record(path)?.ok_or_else(|| Error::not_found(path))?;
        if record.tag != tag {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: tag,
                found: record.tag.to_string(),
            });
        }
        let parent = path.parent().unwrap_or_default();
        let file_path = self.dir_path(&parent).join(&record.file);
        log::debug!("Reading {}...", file_path.display());
        let bytes = fs::read(&file_path)?;
        self.codecs.decode(tag, &bytes.into(), &record.meta)
    }

    fn write_payload(
        &mut self,
        path: &Path,
        tag: TypeTag,
        value: &PayloadValue,
    ) -> Result<(), Error> {
        ensure_writable(self.mode, path, "write")?;
        let (parent, name) = self.split_in_group(path)?;
        let encoded = self.codecs.encode(tag, value)?;
        let file = self.codecs.file_name(name, tag)?;
        self.claim_file(&parent, name, &file)?;

        let dir = self.dir_path(&parent);
        let previous = self.directory(&parent)?.get(name).cloned();
        let attributes = match previous {
            Some(previous) if previous.tag == TypeTag::Group => {
                return Err(Error::already_exists(path, "a group is stored here"));
            }
            Some(previous) => {
                if previous.file != file {
                    log::debug!("Removing {}...", dir.join(&previous.file).display());
                    fs::remove_file(dir.join(&previous.file))?;
                }
                previous.attributes
            }
            None => None,
        };

        let file_path = dir.join(&file);
        log::debug!("Writing {}...", file_path.display());
        fs::write(&file_path, &encoded.bytes)?;

        self.directory(&parent)?.put(
            name,
            EntryRecord {
                file,
                tag,
                meta: encoded.meta,
                attributes,
            },
        );
        self.save_directory(&parent)
    }

    fn delete_node(&mut self, path: &Path) -> Result<(), Error> {
        ensure_writable(self.mode, path, "delete")?;
        let (parent, name) = self.split_in_group(path)?;
        let record = self
            .directory(&parent)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(path))?;
        let file_path = self.dir_path(&parent).join(&record.file);

        if record.tag == TypeTag::Group {
            if !self.directory(path)?.entries.is_empty() {
                return Err(Error::already_exists(path, "group is not empty"));
            }
            log::debug!("Removing {}...", file_path.display());
            fs::remove_dir_all(&file_path)?;
            self.directories.retain(|cached, _| !cached.has_prefix(path));
        } else {
            log::debug!("Removing {}...", file_path.display());
            match fs::remove_file(&file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::warn!("{} was already gone", file_path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.directory(&parent)?.remove(name);
        self.save_directory(&parent)
    }

    fn list_children(&mut self, path: &Path, filter: ChildFilter) -> Result<Vec<String>, Error> {
        let tag = self.type_of(path)?;
        if tag != TypeTag::Group {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: TypeTag::Group,
                found: tag.to_string(),
            });
        }
        Ok(self
            .directory(path)?
            .entries
            .iter()
            .filter(|(_, r)| filter.matches(r.tag))
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn load_attributes(&mut self, path: &Path) -> Result<Value, Error> {
        match self.type_of(path)? {
            TypeTag::Group => Ok(self.directory(path)?.attributes.clone()),
            _ => Ok(self
                .record(path)?
                .and_then(|r| r.attributes)
                .unwrap_or_else(Value::map)),
        }
    }

    fn store_attributes(&mut self, path: &Path, attributes: &Value) -> Result<(), Error> {
        ensure_writable(self.mode, path, "store attributes")?;
        if self.type_of(path)? == TypeTag::Group {
            self.directory(path)?.attributes = attributes.clone();
            return self.save_directory(path);
        }

        let (parent, name) = self.split_in_group(path)?;
        let record = self
            .directory(&parent)?
            .get_mut(name)
            .ok_or_else(|| Error::not_found(path))?;
        record.attributes = if attributes.is_empty_map() {
            None
        } else {
            Some(attributes.clone())
        };
        self.save_directory(&parent)
    }

    fn close(&mut self) -> Result<(), Error> {
        log::debug!("Closing local store {}", self.root.display());
        self.directories.clear();
        Ok(())
    }
}

/// Differences between metadata files and the files actually on disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Recorded entries whose file or directory is missing (or of the wrong
    /// kind).
    pub missing_files: Vec<path::PathBuf>,
    /// Files and directories no metadata file mentions.
    pub unrecorded_files: Vec<path::PathBuf>,
    pub directories_without_metadata: Vec<path::PathBuf>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty()
            && self.unrecorded_files.is_empty()
            && self.directories_without_metadata.is_empty()
    }
}

/// Opens [`LocalDiskBackend`]s for plain filesystem paths and `file://` URIs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalDiskDriver;

const FILE_SCHEME: &str = "file://";

impl LocalDiskDriver {
    fn has_foreign_scheme(uri: &str) -> bool {
        // A single letter before ':' is a drive letter, not a scheme.
        match uri.find(':') {
            Some(index) if index > 1 => uri[..index]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
            _ => false,
        }
    }
}

impl Driver for LocalDiskDriver {
    fn name(&self) -> &str {
        "file"
    }

    fn accepts_path(&self, uri: &str) -> bool {
        !uri.is_empty() && (uri.starts_with(FILE_SCHEME) || !Self::has_foreign_scheme(uri))
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn Backend>, Error> {
        let location = uri.strip_prefix(FILE_SCHEME).unwrap_or(uri);
        Ok(Box::new(LocalDiskBackend::open(location, mode)?))
    }
}
