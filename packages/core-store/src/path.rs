//! Slash-delimited paths with `.` and `..` resolution.
//!
//! The same syntax addresses entries inside a store and keys inside an
//! entry's attribute map. Parsing ([`Path::parse`]) keeps the raw components
//! so that relative references can be resolved against any base; resolution
//! ([`Path::resolve`]) produces a normalized [`Path`] that never contains an
//! empty, `.` or `..` component.

use std::fmt;

/// Component separator.
pub const SEPARATOR: char = '/';

/// Component that drops the last component of the running path.
pub const PARENT: &str = "..";

/// Component that leaves the running path unchanged.
pub const CURRENT: &str = ".";

/// Errors related to path parsing and resolution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path text contains an empty component.
    #[error("malformed path '{text}': empty component at position {position}")]
    Malformed { text: String, position: usize },

    /// The path is well-formed but cannot be resolved or used.
    #[error("invalid path: {message}")]
    Invalid { message: String },
}

impl PathError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PathError::Invalid {
            message: message.into(),
        }
    }
}

/// A parsed, unresolved path.
///
/// Components may still contain `.` and `..`; `absolute` records whether the
/// text started with a separator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathSpec {
    pub absolute: bool,
    pub components: Vec<String>,
}

impl PathSpec {
    /// True if this spec refers to the base it is resolved against.
    pub fn is_self(&self) -> bool {
        !self.absolute && self.components.is_empty()
    }
}

/// A normalized path: an ordered sequence of non-empty components, none of
/// them `.` or `..`. The empty path is the root.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Path {
            components: Vec::new(),
        }
    }

    /// Parse path text into its raw components.
    ///
    /// # Path Syntax
    ///
    /// - Components are separated by `/`
    /// - A leading `/` marks the path absolute; `"/"` alone is the absolute root
    /// - The empty string is the relative self-reference
    /// - Any other empty component (`"a//b"`, `"a/"`) is malformed
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entrystore_core::Path;
    ///
    /// let spec = Path::parse("/a/../b").unwrap();
    /// assert!(spec.absolute);
    /// assert_eq!(spec.components, vec!["a", "..", "b"]);
    ///
    /// assert!(Path::parse("a//b").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<PathSpec, PathError> {
        if text.is_empty() {
            return Ok(PathSpec {
                absolute: false,
                components: Vec::new(),
            });
        }

        let (absolute, body) = match text.strip_prefix(SEPARATOR) {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        if body.is_empty() {
            return Ok(PathSpec {
                absolute,
                components: Vec::new(),
            });
        }

        let mut components = Vec::new();
        for (position, component) in body.split(SEPARATOR).enumerate() {
            if component.is_empty() {
                return Err(PathError::Malformed {
                    text: text.to_string(),
                    position,
                });
            }
            components.push(component.to_string());
        }

        Ok(PathSpec {
            absolute,
            components,
        })
    }

    /// Parse and resolve `text` against the root.
    pub fn from_string(text: &str) -> Result<Self, PathError> {
        let spec = Self::parse(text)?;
        Self::root().resolve(&spec.components)
    }

    /// The canonical form of `text`.
    ///
    /// `Path::from_string(s)?.to_string() == Path::normalize(s)?` for every
    /// well-formed `s`.
    pub fn normalize(text: &str) -> Result<String, PathError> {
        Ok(Self::from_string(text)?.to_string())
    }

    /// Apply `additions` left to right: `..` pops the last component of the
    /// running result, `.` is skipped, anything else is appended.
    ///
    /// ```rust
    /// use entrystore_core::Path;
    ///
    /// let base = Path::from_string("a/b").unwrap();
    /// assert_eq!(base.resolve(&["..", "c"]).unwrap().to_string(), "a/c");
    /// assert!(Path::root().resolve(&[".."]).is_err());
    /// ```
    pub fn resolve<S: AsRef<str>>(&self, additions: &[S]) -> Result<Self, PathError> {
        let mut components = self.components.clone();
        for (position, addition) in additions.iter().enumerate() {
            let addition = addition.as_ref();
            match addition {
                PARENT => {
                    if components.pop().is_none() {
                        return Err(PathError::invalid(format!(
                            "'..' at position {} escapes the root",
                            position
                        )));
                    }
                }
                CURRENT => {}
                "" => {
                    return Err(PathError::Malformed {
                        text: additions
                            .iter()
                            .map(|a| a.as_ref())
                            .collect::<Vec<_>>()
                            .join("/"),
                        position,
                    })
                }
                other if other.contains(SEPARATOR) => {
                    return Err(PathError::invalid(format!(
                        "component '{}' contains a separator",
                        other
                    )))
                }
                other => components.push(other.to_string()),
            }
        }
        Ok(Path { components })
    }

    /// Resolve a parsed spec: absolute specs start from the root, relative
    /// ones from `self`.
    pub fn apply(&self, spec: &PathSpec) -> Result<Self, PathError> {
        if spec.absolute {
            Self::root().resolve(&spec.components)
        } else {
            self.resolve(&spec.components)
        }
    }

    /// Build a path from already-normalized components.
    pub fn try_from_components(components: Vec<String>) -> Result<Self, PathError> {
        for (position, component) in components.iter().enumerate() {
            Self::validate_name(component).map_err(|_| PathError::Malformed {
                text: components.join("/"),
                position,
            })?;
        }
        Ok(Path { components })
    }

    /// Check that `name` can be used as a single component.
    pub fn validate_name(name: &str) -> Result<(), PathError> {
        if name.is_empty() {
            return Err(PathError::Malformed {
                text: name.to_string(),
                position: 0,
            });
        }
        if name == PARENT || name == CURRENT || name.contains(SEPARATOR) {
            return Err(PathError::invalid(format!(
                "'{}' is not a valid entry name",
                name
            )));
        }
        Ok(())
    }

    /// The path of the immediate child called `name`.
    pub fn child(&self, name: &str) -> Result<Self, PathError> {
        Self::validate_name(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Path { components })
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Path {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The last component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if this path has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterate over components.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.components.iter()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Join this path with another.
    #[must_use]
    pub fn join(&self, other: &Path) -> Path {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Path { components }
    }

    /// Check if this path has the given prefix.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        prefix.components.len() <= self.components.len()
            && prefix.components == self.components[..prefix.components.len()]
    }

    /// Strip a prefix from this path.
    ///
    /// Returns `None` if the prefix doesn't match.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if self.has_prefix(prefix) {
            Some(Path {
                components: self.components[prefix.components.len()..].to_vec(),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::from_string(s)
    }
}

impl std::ops::Index<usize> for Path {
    type Output = String;

    fn index(&self, i: usize) -> &Self::Output {
        &self.components[i]
    }
}

/// Macro for creating paths from literals.
///
/// # Example
///
/// ```rust
/// use entrystore_core::path;
///
/// let p = path!("groups/run1/trace");
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! path {
    ($s:expr) => {
        $crate::Path::from_string($s).expect("invalid path literal")
    };
}
