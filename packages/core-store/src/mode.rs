//! Store open modes.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// How a store is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// `r`: the store must exist; every mutation is refused.
    Read,
    /// `r+`: the store must exist; anything may change.
    ReadWrite,
    /// `a`: created if missing; new entries and attribute keys only.
    Append,
    /// `w`: any existing store is destroyed and recreated empty.
    Write,
    /// `x`: created; fails if something already exists at the location.
    Exclusive,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadWrite => "r+",
            OpenMode::Append => "a",
            OpenMode::Write => "w",
            OpenMode::Exclusive => "x",
        }
    }

    /// False only for `r`.
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// True if existing entries and attribute keys may be replaced or removed.
    pub fn allows_overwrite(&self) -> bool {
        matches!(
            self,
            OpenMode::ReadWrite | OpenMode::Write | OpenMode::Exclusive
        )
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadWrite),
            "a" => Ok(OpenMode::Append),
            "w" => Ok(OpenMode::Write),
            "x" => Ok(OpenMode::Exclusive),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}
