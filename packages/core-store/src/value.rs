//! The Value type - a tree-shaped data structure.
//!
//! Attributes, key-value payloads and table cells are all Values. A Value maps
//! directly onto JSON, which is how the reference backends persist it.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::path::{Path, PathError};

/// A dynamically typed tree value.
///
/// Uses `BTreeMap` for deterministic key ordering, so two stores holding the
/// same attributes serialize them identically.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// True for `Null` and for maps without keys.
    pub fn is_empty_map(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get a reference to a nested value by path.
    ///
    /// Returns `None` if the path doesn't exist or can't be navigated
    /// (e.g., trying to index into a string).
    pub fn get(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for component in path.iter() {
            current = match current {
                Value::Map(map) => map.get(component)?,
                Value::Array(arr) => {
                    let index: usize = component.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get a mutable reference to a nested value by path.
    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for component in path.iter() {
            current = match current {
                Value::Map(map) => map.get_mut(component)?,
                Value::Array(arr) => {
                    let index: usize = component.parse().ok()?;
                    arr.get_mut(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a value at a path, creating intermediate maps as needed.
    ///
    /// A `Null` found on the way is replaced by a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the path traverses through a non-container value
    /// (e.g., trying to set `foo/bar` when `foo` is a string).
    pub fn set(&mut self, path: &Path, value: Value) -> Result<(), PathError> {
        if path.is_empty() {
            *self = value;
            return Ok(());
        }

        let mut current = self;
        for (i, component) in path.iter().enumerate() {
            let is_last = i == path.len() - 1;

            if current.is_null() {
                *current = Value::map();
            }

            if is_last {
                match current {
                    Value::Map(map) => {
                        map.insert(component.clone(), value);
                        return Ok(());
                    }
                    Value::Array(arr) => {
                        let index = parse_index(component)?;
                        if index < arr.len() {
                            arr[index] = value;
                        } else if index == arr.len() {
                            arr.push(value);
                        } else {
                            return Err(PathError::invalid(format!(
                                "array index {} out of bounds",
                                index
                            )));
                        }
                        return Ok(());
                    }
                    _ => {
                        return Err(PathError::invalid(format!(
                            "cannot set child '{}' on non-container value",
                            component
                        )));
                    }
                }
            } else {
                current = match current {
                    Value::Map(map) => map
                        .entry(component.clone())
                        .or_insert_with(|| Value::Map(BTreeMap::new())),
                    Value::Array(arr) => {
                        let index = parse_index(component)?;
                        arr.get_mut(index).ok_or_else(|| {
                            PathError::invalid(format!("array index {} out of bounds", index))
                        })?
                    }
                    _ => {
                        return Err(PathError::invalid(format!(
                            "cannot navigate through non-container at '{}'",
                            component
                        )));
                    }
                };
            }
        }

        Ok(())
    }

    /// Remove a value at a path, returning it if it existed.
    pub fn remove(&mut self, path: &Path) -> Result<Option<Value>, PathError> {
        let (parent_path, last_component) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.to_string()),
            _ => {
                let old = std::mem::replace(self, Value::Null);
                return Ok(Some(old));
            }
        };

        let parent = match self.get_mut(&parent_path) {
            Some(p) => p,
            None => return Ok(None),
        };

        match parent {
            Value::Map(map) => Ok(map.remove(&last_component)),
            Value::Array(arr) => {
                let index = parse_index(&last_component)?;
                if index < arr.len() {
                    Ok(Some(arr.remove(index)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    /// Convert to `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn parse_index(component: &str) -> Result<usize, PathError> {
    component
        .parse()
        .map_err(|_| PathError::invalid(format!("invalid array index: {}", component)))
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    // Fallback for very large numbers
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(arr) => arr.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;

    #[test]
    fn get_nested_value() {
        let mut value = Value::map();
        value.set(&path!("foo/bar"), Value::from("hello")).unwrap();

        assert_eq!(value.get(&path!("foo/bar")), Some(&Value::from("hello")));
        let foo = value.get(&path!("foo")).unwrap();
        assert!(foo.is_map());
        assert_eq!(foo.get(&path!("bar")), Some(&Value::from("hello")));
        assert_eq!(value.get(&path!("nonexistent")), None);
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut value = Value::Null;
        value.set(&path!("a/b/c/d"), Value::from(42i64)).unwrap();

        assert_eq!(value.get(&path!("a/b/c/d")), Some(&Value::from(42i64)));
        assert!(value.get(&path!("a")).unwrap().is_map());
        assert!(value.get(&path!("a/b")).unwrap().is_map());
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut value = Value::map();
        value.set(&path!("a"), Value::from("leaf")).unwrap();
        assert!(value.set(&path!("a/b"), Value::from(1i64)).is_err());
    }

    #[test]
    fn remove_works() {
        let mut value = Value::map();
        value.set(&path!("foo/bar"), Value::from("hello")).unwrap();

        let removed = value.remove(&path!("foo/bar")).unwrap();
        assert_eq!(removed, Some(Value::from("hello")));
        assert_eq!(value.get(&path!("foo/bar")), None);

        // Parent still exists
        assert!(value.get(&path!("foo")).is_some());
        assert_eq!(value.remove(&path!("foo/missing")).unwrap(), None);
    }

    #[test]
    fn array_access_works() {
        let mut value = Value::map();
        value
            .set(
                &path!("shape"),
                Value::from(vec![3i64, 4]),
            )
            .unwrap();

        assert_eq!(value.get(&path!("shape/0")), Some(&Value::from(3i64)));
        assert_eq!(value.get(&path!("shape/1")), Some(&Value::from(4i64)));
        assert_eq!(value.get(&path!("shape/2")), None);
    }

    #[test]
    fn json_roundtrip() {
        let json = serde_json::json!({
            "integer": 42,
            "float": 2.75,
            "nested": {"list": [1, "two", null, true]},
        });

        let value = Value::from(json.clone());
        assert_eq!(value.get(&path!("integer")), Some(&Value::Integer(42)));
        assert_eq!(value.get(&path!("float")), Some(&Value::Float(2.75)));
        assert_eq!(value.to_json(), json);

        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
