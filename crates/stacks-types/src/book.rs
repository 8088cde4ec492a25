use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::BookId;
use crate::record::Record;

/// Document field names for book records.
pub mod field {
    pub const TITLE: &str = "title";
    pub const AUTHOR: &str = "author";
    pub const ISBN: &str = "isbn";
    pub const PUBLISHER: &str = "publisher";
    pub const PUBLICATION_YEAR: &str = "publicationYear";
    pub const GENRE: &str = "genre";
    pub const DESCRIPTION: &str = "description";
    pub const COVER_URL: &str = "coverUrl";
    pub const COPIES: &str = "copies";
    pub const AVAILABLE_COPIES: &str = "availableCopies";
    pub const STATUS: &str = "status";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Genre assigned when none is supplied.
pub const DEFAULT_GENRE: &str = "General";

/// Lifecycle status of a catalog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Available,
    CheckedOut,
    Lost,
    Maintenance,
}

impl BookStatus {
    pub const ALL: [BookStatus; 4] = [
        Self::Available,
        Self::CheckedOut,
        Self::Lost,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::CheckedOut => "checked_out",
            Self::Lost => "lost",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TypeError::UnknownVariant {
                kind: "book status",
                value: s.to_string(),
            })
    }
}

/// A catalog entry.
///
/// `copies` is the number of physical units owned; `available_copies` is the
/// number on the shelf. Both are store-side counters and are only ever moved
/// by increments, so they are kept signed to let an audit see a drifted
/// value instead of failing to decode it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(skip)]
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub isbn: String,
    #[serde(default)]
    pub publisher: String,
    pub publication_year: i32,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_url: String,
    pub copies: i64,
    pub available_copies: i64,
    pub status: BookStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_genre() -> String {
    DEFAULT_GENRE.to_string()
}

impl Book {
    /// Copies currently out on loan, according to the counters.
    pub fn copies_on_loan(&self) -> i64 {
        self.copies - self.available_copies
    }

    /// Whether the counters satisfy `0 <= available_copies <= copies`.
    pub fn counters_consistent(&self) -> bool {
        0 <= self.available_copies && self.available_copies <= self.copies
    }
}

impl Record for Book {
    type Id = BookId;

    fn id(&self) -> &BookId {
        &self.id
    }

    fn set_id(&mut self, id: BookId) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_document_with_defaults() {
        let doc = json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "isbn": "9780441013593",
            "publicationYear": 1965,
            "copies": 3,
            "availableCopies": 2,
            "status": "available",
            "createdAt": 1_700_000_000_000i64
        });
        let fields = doc.as_object().unwrap().clone();
        let book = Book::from_fields("b1", fields).unwrap();

        assert_eq!(book.id.as_str(), "b1");
        assert_eq!(book.genre, DEFAULT_GENRE);
        assert_eq!(book.copies_on_loan(), 1);
        assert!(book.counters_consistent());
        assert_eq!(book.created_at.unwrap().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn encodes_camel_case_without_id() {
        let book = Book {
            id: BookId::from("b1"),
            title: "T".into(),
            author: "A".into(),
            isbn: "I".into(),
            publisher: String::new(),
            publication_year: 2000,
            genre: DEFAULT_GENRE.into(),
            description: String::new(),
            cover_url: String::new(),
            copies: 1,
            available_copies: 1,
            status: BookStatus::Available,
            created_at: None,
            updated_at: None,
        };
        let fields = book.to_fields().unwrap();
        assert!(fields.contains_key(field::AVAILABLE_COPIES));
        assert!(fields.contains_key(field::PUBLICATION_YEAR));
        assert!(!fields.contains_key("id"));
        assert!(!fields.contains_key(field::CREATED_AT));
    }

    #[test]
    fn status_parses_from_stored_strings() {
        assert_eq!("checked_out".parse::<BookStatus>().unwrap(), BookStatus::CheckedOut);
        assert!("shelved".parse::<BookStatus>().is_err());
    }

    #[test]
    fn detects_drifted_counters() {
        let doc = json!({
            "title": "T", "author": "A", "isbn": "I", "publicationYear": 2000,
            "copies": 1, "availableCopies": -1, "status": "available"
        });
        let book = Book::from_fields("b", doc.as_object().unwrap().clone()).unwrap();
        assert!(!book.counters_consistent());
    }
}
