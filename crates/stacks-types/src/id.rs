use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Generate a fresh record key (UUID v7, so keys sort by creation time).
pub fn generate_key() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing store key, rejecting blank keys and path separators.
            pub fn parse(key: impl Into<String>) -> Result<Self, TypeError> {
                let key = key.into();
                if key.trim().is_empty() || key.contains('/') {
                    return Err(TypeError::InvalidId(format!("{}: {key:?}", $label)));
                }
                Ok(Self(key))
            }

            /// The underlying store key.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Short representation (first 8 characters of the key).
            pub fn short_id(&self) -> &str {
                let end = self
                    .0
                    .char_indices()
                    .nth(8)
                    .map(|(i, _)| i)
                    .unwrap_or(self.0.len());
                &self.0[..end]
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(
    /// Key of a book record.
    BookId,
    "book id"
);
record_id!(
    /// Key of a member record.
    MemberId,
    "member id"
);
record_id!(
    /// Key of a checkout transaction record.
    TransactionId,
    "transaction id"
);
