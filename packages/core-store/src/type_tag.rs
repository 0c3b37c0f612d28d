//! The closed set of entry type tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// What is stored at an entry.
///
/// `Group` entries hold children; every other tag names a payload kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Group,
    Dataset,
    Table,
    KeyValue,
    Image,
    Binary,
}

impl TypeTag {
    pub const ALL: [TypeTag; 6] = [
        TypeTag::Group,
        TypeTag::Dataset,
        TypeTag::Table,
        TypeTag::KeyValue,
        TypeTag::Image,
        TypeTag::Binary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Group => "group",
            TypeTag::Dataset => "dataset",
            TypeTag::Table => "table",
            TypeTag::KeyValue => "keyvalue",
            TypeTag::Image => "image",
            TypeTag::Binary => "binary",
        }
    }

    /// True for every tag except `Group`.
    pub fn is_payload(&self) -> bool {
        !matches!(self, TypeTag::Group)
    }

    /// True for tags whose payload is an n-dimensional array.
    pub fn is_array(&self) -> bool {
        matches!(self, TypeTag::Dataset | TypeTag::Image)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::ALL
            .iter()
            .find(|tag| tag.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tag() {
        for tag in TypeTag::ALL {
            assert_eq!(tag.as_str().parse::<TypeTag>().unwrap(), tag);
        }
    }

    #[test]
    fn rejects_unknown_tags() {
        assert!(matches!(
            "ndarray".parse::<TypeTag>(),
            Err(Error::UnknownType(name)) if name == "ndarray"
        ));
        assert!("Dataset".parse::<TypeTag>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&TypeTag::KeyValue).unwrap();
        assert_eq!(json, "\"keyvalue\"");
        let tag: TypeTag = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(tag, TypeTag::Image);
    }

    #[test]
    fn payload_classification() {
        assert!(!TypeTag::Group.is_payload());
        assert!(TypeTag::Binary.is_payload());
        assert!(TypeTag::Dataset.is_array());
        assert!(TypeTag::Image.is_array());
        assert!(!TypeTag::Table.is_array());
    }
}
