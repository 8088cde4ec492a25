use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root under which all collections live.
pub const ROOT: &str = "library";

/// Top-level document collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Books,
    Members,
    Transactions,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Books, Self::Members, Self::Transactions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Members => "members",
            Self::Transactions => "transactions",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ROOT}/{}", self.as_str())
    }
}

/// Address of a single field: `library/<collection>/<key>/<field>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub collection: Collection,
    pub key: String,
    pub field: String,
}

impl FieldPath {
    pub fn new(collection: Collection, key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection,
            key: key.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.collection, self.key, self.field)
    }
}

/// A write to one field, resolved by the store.
///
/// `Increment` and `ServerTimestamp` are evaluated store-side at apply time,
/// never from a value the client read earlier.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldWrite {
    Set(Value),
    Increment(i64),
    ServerTimestamp,
}

/// A field write bound to its path.
#[derive(Clone, Debug, PartialEq)]
pub struct PathWrite {
    pub path: FieldPath,
    pub write: FieldWrite,
}

impl PathWrite {
    pub fn set(path: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            write: FieldWrite::Set(value.into()),
        }
    }

    pub fn increment(path: FieldPath, delta: i64) -> Self {
        Self {
            path,
            write: FieldWrite::Increment(delta),
        }
    }

    pub fn server_timestamp(path: FieldPath) -> Self {
        Self {
            path,
            write: FieldWrite::ServerTimestamp,
        }
    }
}

/// A precondition checked atomically with a guarded write.
///
/// A guard on a document that does not exist never holds.
#[derive(Clone, Debug, PartialEq)]
pub enum Guard {
    /// Field equals the given value. A missing field compares as `null`.
    Equals { path: FieldPath, value: Value },
    /// Integer field is at least `min`. A missing field reads as 0.
    AtLeast { path: FieldPath, min: i64 },
}

impl Guard {
    pub fn equals(path: FieldPath, value: impl Into<Value>) -> Self {
        Self::Equals {
            path,
            value: value.into(),
        }
    }

    pub fn at_least(path: FieldPath, min: i64) -> Self {
        Self::AtLeast { path, min }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Equals { path, .. } | Self::AtLeast { path, .. } => path,
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { path, value } => write!(f, "{path} == {value}"),
            Self::AtLeast { path, min } => write!(f, "{path} >= {min}"),
        }
    }
}

/// Result of a guarded write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// Every guard held and every write landed.
    Applied,
    /// A guard failed; nothing was written.
    Rejected { guard: Guard, actual: Value },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Sentinel values resolved by the store inside whole-document writes.
///
/// These use the `{".sv": ...}` shape of hosted realtime databases, so a
/// document built client-side can request a server clock value without the
/// client computing it.
pub mod server_value {
    use serde_json::{json, Value};

    const KEY: &str = ".sv";

    /// Placeholder replaced by the store's clock (epoch milliseconds).
    pub fn timestamp() -> Value {
        json!({ ".sv": "timestamp" })
    }

    pub fn is_timestamp(value: &Value) -> bool {
        value
            .as_object()
            .and_then(|obj| obj.get(KEY))
            .and_then(Value::as_str)
            == Some("timestamp")
    }
}
