use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::TypeError;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// A record type that round-trips through a store document.
///
/// The key is not part of the document body; it is carried on the struct
/// (skipped by serde) and restored from the store key on load.
pub trait Record: Serialize + DeserializeOwned {
    type Id: From<String> + AsRef<str> + Clone;

    fn id(&self) -> &Self::Id;

    fn set_id(&mut self, id: Self::Id);

    /// Serialize into the document field map.
    fn to_fields(&self) -> Result<Fields, TypeError> {
        match serde_json::to_value(self).map_err(|e| TypeError::Serialization(e.to_string()))? {
            Value::Object(fields) => Ok(fields),
            other => Err(TypeError::Serialization(format!(
                "record serialized to non-object value: {other}"
            ))),
        }
    }

    /// Rebuild a record from its store key and document.
    fn from_fields(key: &str, fields: Fields) -> Result<Self, TypeError> {
        decode_fields(key, fields)
    }
}

/// Deserialize a document body and attach its store key.
pub fn decode_fields<R: Record>(key: &str, fields: Fields) -> Result<R, TypeError> {
    let mut record: R = serde_json::from_value(Value::Object(fields))
        .map_err(|e| TypeError::Serialization(format!("{key}: {e}")))?;
    record.set_id(R::Id::from(key.to_string()));
    Ok(record)
}
