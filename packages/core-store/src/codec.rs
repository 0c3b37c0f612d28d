//! Payload codecs: converting payload values to and from stored bytes.
//!
//! A backend never interprets payload bytes itself. It asks the [`CodecSet`]
//! for the codec registered under the slot's type tag, stores the encoded
//! bytes, and keeps the [`PayloadMeta`] next to them so that decoding can
//! rebuild arrays without parsing the data.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::payload::{ByteOrder, DType, NdArray, PayloadValue, Table};
use crate::{Error, TypeTag, Value};

/// Node metadata recorded alongside an encoded payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byteorder: Option<ByteOrder>,
}

impl PayloadMeta {
    /// Metadata describing `array`.
    pub fn for_array(array: &NdArray) -> Self {
        PayloadMeta {
            dtype: Some(array.dtype()),
            shape: Some(array.shape().to_vec()),
            byteorder: Some(array.byteorder()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dtype.is_none() && self.shape.is_none() && self.byteorder.is_none()
    }
}

/// The output of [`Codec::encode`].
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    pub bytes: Bytes,
    pub meta: PayloadMeta,
}

/// Serializer for one payload type tag.
///
/// # Object Safety
///
/// This trait is object-safe: [`CodecSet`] stores `Box<dyn Codec>`.
pub trait Codec: Send + Sync {
    /// The tag this codec serves.
    fn type_tag(&self) -> TypeTag;

    /// File suffix used by file-backed stores, including the leading dot.
    fn suffix(&self) -> &str;

    fn encode(&self, value: &PayloadValue) -> Result<Encoded, Error>;

    fn decode(&self, bytes: &Bytes, meta: &PayloadMeta) -> Result<PayloadValue, Error>;
}

/// Raw C-order array bytes for `dataset` and `image` slots.
pub struct ArrayCodec {
    tag: TypeTag,
    suffix: &'static str,
}

impl ArrayCodec {
    pub fn dataset() -> Self {
        ArrayCodec {
            tag: TypeTag::Dataset,
            suffix: ".array",
        }
    }

    pub fn image() -> Self {
        ArrayCodec {
            tag: TypeTag::Image,
            suffix: ".image",
        }
    }
}

impl Codec for ArrayCodec {
    fn type_tag(&self) -> TypeTag {
        self.tag
    }

    fn suffix(&self) -> &str {
        self.suffix
    }

    fn encode(&self, value: &PayloadValue) -> Result<Encoded, Error> {
        let array = match value {
            PayloadValue::Array(array) => array,
            other => {
                return Err(Error::codec(
                    self.tag,
                    format!("cannot encode a {} payload", other.kind()),
                ))
            }
        };
        Ok(Encoded {
            bytes: array.data().clone(),
            meta: PayloadMeta::for_array(array),
        })
    }

    fn decode(&self, bytes: &Bytes, meta: &PayloadMeta) -> Result<PayloadValue, Error> {
        let (dtype, shape) = match (meta.dtype, &meta.shape) {
            (Some(dtype), Some(shape)) => (dtype, shape.clone()),
            _ => {
                return Err(Error::codec(
                    self.tag,
                    "stored array has no dtype/shape metadata",
                ))
            }
        };
        if let Some(order) = meta.byteorder {
            if order != ByteOrder::NotApplicable && order != ByteOrder::native() {
                log::warn!(
                    "array stored as {} endian, reading as native {}",
                    order,
                    ByteOrder::native()
                );
            }
        }
        NdArray::new(dtype, shape, bytes.clone())
            .map(PayloadValue::Array)
            .map_err(|e| Error::codec(self.tag, e.to_string()))
    }
}

/// Tables as a JSON document `{"columns": [...], "rows": [[...], ...]}`.
pub struct TableCodec;

impl Codec for TableCodec {
    fn type_tag(&self) -> TypeTag {
        TypeTag::Table
    }

    fn suffix(&self) -> &str {
        ".table.json"
    }

    fn encode(&self, value: &PayloadValue) -> Result<Encoded, Error> {
        let table = match value {
            PayloadValue::Table(table) => table,
            other => {
                return Err(Error::codec(
                    TypeTag::Table,
                    format!("cannot encode a {} payload", other.kind()),
                ))
            }
        };
        let bytes =
            serde_json::to_vec(table).map_err(|e| Error::codec(TypeTag::Table, e.to_string()))?;
        Ok(Encoded {
            bytes: Bytes::from(bytes),
            meta: PayloadMeta::default(),
        })
    }

    fn decode(&self, bytes: &Bytes, _meta: &PayloadMeta) -> Result<PayloadValue, Error> {
        let table: Table =
            serde_json::from_slice(bytes).map_err(|e| Error::codec(TypeTag::Table, e.to_string()))?;
        // Re-check row widths; the file may have been edited by hand.
        Table::with_rows(table.columns().to_vec(), table.rows().to_vec())
            .map(PayloadValue::Table)
            .map_err(|e| Error::codec(TypeTag::Table, e.to_string()))
    }
}

/// Key-value maps as a JSON object.
pub struct KeyValueCodec;

impl Codec for KeyValueCodec {
    fn type_tag(&self) -> TypeTag {
        TypeTag::KeyValue
    }

    fn suffix(&self) -> &str {
        ".kv.json"
    }

    fn encode(&self, value: &PayloadValue) -> Result<Encoded, Error> {
        let map = match value {
            PayloadValue::KeyValue(map) => map,
            other => {
                return Err(Error::codec(
                    TypeTag::KeyValue,
                    format!("cannot encode a {} payload", other.kind()),
                ))
            }
        };
        let bytes =
            serde_json::to_vec(map).map_err(|e| Error::codec(TypeTag::KeyValue, e.to_string()))?;
        Ok(Encoded {
            bytes: Bytes::from(bytes),
            meta: PayloadMeta::default(),
        })
    }

    fn decode(&self, bytes: &Bytes, _meta: &PayloadMeta) -> Result<PayloadValue, Error> {
        let map: BTreeMap<String, Value> = serde_json::from_slice(bytes)
            .map_err(|e| Error::codec(TypeTag::KeyValue, e.to_string()))?;
        Ok(PayloadValue::KeyValue(map))
    }
}

/// Opaque bytes, stored as-is.
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn type_tag(&self) -> TypeTag {
        TypeTag::Binary
    }

    fn suffix(&self) -> &str {
        ".bin"
    }

    fn encode(&self, value: &PayloadValue) -> Result<Encoded, Error> {
        match value {
            PayloadValue::Binary(bytes) => Ok(Encoded {
                bytes: bytes.clone(),
                meta: PayloadMeta::default(),
            }),
            other => Err(Error::codec(
                TypeTag::Binary,
                format!("cannot encode a {} payload", other.kind()),
            )),
        }
    }

    fn decode(&self, bytes: &Bytes, _meta: &PayloadMeta) -> Result<PayloadValue, Error> {
        Ok(PayloadValue::Binary(bytes.clone()))
    }
}

/// One codec per payload type tag.
pub struct CodecSet {
    codecs: BTreeMap<TypeTag, Box<dyn Codec>>,
}

impl CodecSet {
    /// A set with no codecs registered.
    pub fn empty() -> Self {
        CodecSet {
            codecs: BTreeMap::new(),
        }
    }

    /// Register `codec` under its own tag, replacing any previous codec.
    ///
    /// Returns an error for the `group` tag, which has no payload.
    pub fn register(&mut self, codec: Box<dyn Codec>) -> Result<(), Error> {
        let tag = codec.type_tag();
        if !tag.is_payload() {
            return Err(Error::unsupported("codec set", "a codec for group entries"));
        }
        self.codecs.insert(tag, codec);
        Ok(())
    }

    /// The codec for `tag`.
    pub fn get(&self, tag: TypeTag) -> Result<&dyn Codec, Error> {
        self.codecs
            .get(&tag)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| Error::unsupported("codec set", format!("{} payloads", tag)))
    }

    pub fn encode(&self, tag: TypeTag, value: &PayloadValue) -> Result<Encoded, Error> {
        self.get(tag)?.encode(value)
    }

    pub fn decode(
        &self,
        tag: TypeTag,
        bytes: &Bytes,
        meta: &PayloadMeta,
    ) -> Result<PayloadValue, Error> {
        self.get(tag)?.decode(bytes, meta)
    }

    /// The physical file name for a payload called `name`.
    pub fn file_name(&self, name: &str, tag: TypeTag) -> Result<String, Error> {
        Ok(format!("{}{}", name, self.get(tag)?.suffix()))
    }

    /// Infer the entry name and tag of a payload file from its suffix.
    ///
    /// The longest matching suffix wins, so `x.table.json` is a table even if
    /// some codec claims `.json`.
    pub fn classify_file<'a>(&self, file_name: &'a str) -> Option<(&'a str, TypeTag)> {
        self.codecs
            .values()
            .filter_map(|codec| {
                let stem = file_name.strip_suffix(codec.suffix())?;
                if stem.is_empty() {
                    None
                } else {
                    Some((codec.suffix().len(), stem, codec.type_tag()))
                }
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, stem, tag)| (stem, tag))
    }
}

impl Default for CodecSet {
    fn default() -> Self {
        let mut codecs: BTreeMap<TypeTag, Box<dyn Codec>> = BTreeMap::new();
        codecs.insert(TypeTag::Dataset, Box::new(ArrayCodec::dataset()));
        codecs.insert(TypeTag::Image, Box::new(ArrayCodec::image()));
        codecs.insert(TypeTag::Table, Box::new(TableCodec));
        codecs.insert(TypeTag::KeyValue, Box::new(KeyValueCodec));
        codecs.insert(TypeTag::Binary, Box::new(BinaryCodec));
        CodecSet { codecs }
    }
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.codecs.keys()).finish()
    }
}
