use std::str::FromStr;

use chrono::Datelike;
use serde_json::Value;
use stacks_store::{
    server_value, typed, Collection, FieldPath, FieldWrite, Guard, PathWrite, StoreError,
    WriteOutcome,
};
use stacks_types::book::{field, DEFAULT_GENRE};
use stacks_types::transaction::field as tx_field;
use stacks_types::{Book, BookId, BookStatus, Record, Transaction, TransactionStatus};
use tracing::{debug, info};

use crate::error::{CatalogError, CatalogResult};
use crate::validate;
use crate::Catalog;

/// Input for registering a new title.
#[derive(Clone, Debug, Default)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    pub genre: Option<String>,
    /// Defaults to 1.
    pub copies: Option<i64>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
}

/// Partial update of a book. `None` and blank strings leave a field alone.
#[derive(Clone, Debug, Default)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub status: Option<BookStatus>,
    pub copies: Option<i64>,
}

/// Fields a book search can match against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BookSearchField {
    #[default]
    Title,
    Author,
    Isbn,
    Genre,
}

impl BookSearchField {
    fn value_of<'a>(&self, book: &'a Book) -> &'a str {
        match self {
            Self::Title => &book.title,
            Self::Author => &book.author,
            Self::Isbn => &book.isbn,
            Self::Genre => &book.genre,
        }
    }
}

impl FromStr for BookSearchField {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to title.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "author" => Self::Author,
            "isbn" => Self::Isbn,
            "genre" => Self::Genre,
            _ => Self::Title,
        })
    }
}

impl Catalog {
    /// Register a new title; every copy starts on the shelf.
    pub async fn add_book(&self, input: NewBook) -> CatalogResult<BookId> {
        let copies = validate::copies(input.copies.unwrap_or(1))?;
        let book = Book {
            id: BookId::default(),
            title: validate::required("title", &input.title)?,
            author: validate::required("author", &input.author)?,
            isbn: validate::required("isbn", &input.isbn)?,
            publisher: validate::optional(input.publisher.as_deref()).unwrap_or_default(),
            publication_year: input
                .publication_year
                .unwrap_or_else(|| self.clock.now().year()),
            genre: validate::optional(input.genre.as_deref())
                .unwrap_or_else(|| DEFAULT_GENRE.to_string()),
            description: validate::optional(input.description.as_deref()).unwrap_or_default(),
            cover_url: validate::optional(input.cover_url.as_deref()).unwrap_or_default(),
            copies,
            available_copies: copies,
            status: BookStatus::Available,
            created_at: None,
            updated_at: None,
        };

        let mut fields = book.to_fields().map_err(StoreError::from)?;
        fields.insert(field::CREATED_AT.into(), server_value::timestamp());
        fields.insert(field::UPDATED_AT.into(), server_value::timestamp());
        let key = self.store.append(Collection::Books, fields).await?;

        info!(book = %key, title = %book.title, copies, "book added");
        Ok(BookId::from(key))
    }

    /// Fetch a book, or `None` if the key is absent.
    pub async fn find_book(&self, id: &BookId) -> CatalogResult<Option<Book>> {
        Ok(typed::load(self.store.as_ref(), Collection::Books, id.as_str()).await?)
    }

    /// Fetch a book that must exist.
    pub async fn get_book(&self, id: &BookId) -> CatalogResult<Book> {
        self.find_book(id)
            .await?
            .ok_or_else(|| CatalogError::BookNotFound(id.clone()))
    }

    /// Apply a partial update.
    ///
    /// A change to `copies` shifts `availableCopies` by the same difference.
    /// It is written as a guarded increment keyed on the copy count read
    /// here, so checkouts landing in between are preserved, and it is refused
    /// if it would leave fewer copies than are currently on loan.
    pub async fn update_book(&self, id: &BookId, update: BookUpdate) -> CatalogResult<()> {
        let mut writes: Vec<(String, FieldWrite)> = Vec::new();
        let mut set_text = |name: &str, value: Option<String>| {
            if let Some(v) = validate::optional(value.as_deref()) {
                writes.push((name.to_string(), FieldWrite::Set(Value::from(v))));
            }
        };
        set_text(field::TITLE, update.title);
        set_text(field::AUTHOR, update.author);
        set_text(field::ISBN, update.isbn);
        set_text(field::PUBLISHER, update.publisher);
        set_text(field::GENRE, update.genre);
        set_text(field::DESCRIPTION, update.description);
        set_text(field::COVER_URL, update.cover_url);
        if let Some(year) = update.publication_year {
            writes.push((field::PUBLICATION_YEAR.into(), FieldWrite::Set(Value::from(year))));
        }
        if let Some(status) = update.status {
            writes.push((field::STATUS.into(), FieldWrite::Set(Value::from(status.as_str()))));
        }
        writes.push((field::UPDATED_AT.into(), FieldWrite::ServerTimestamp));

        let Some(new_copies) = update.copies else {
            return self
                .store
                .update(Collection::Books, id.as_str(), writes)
                .await
                .map_err(|e| book_not_found(e, id));
        };

        let new_copies = validate::copies(new_copies)?;
        let current = self.get_book(id).await?;
        let difference = new_copies - current.copies;
        if current.available_copies + difference < 0 {
            return Err(CatalogError::validation(
                "copies",
                format!(
                    "{new_copies} is fewer than the {} copies on loan",
                    current.copies_on_loan()
                ),
            ));
        }

        let path = |name: &str| FieldPath::new(Collection::Books, id.as_str(), name);
        let mut guards = vec![Guard::equals(path(field::COPIES), current.copies)];
        if difference < 0 {
            guards.push(Guard::at_least(path(field::AVAILABLE_COPIES), -difference));
        }
        let mut path_writes: Vec<PathWrite> = writes
            .into_iter()
            .map(|(name, write)| PathWrite {
                path: path(&name),
                write,
            })
            .collect();
        path_writes.push(PathWrite::set(path(field::COPIES), new_copies));
        path_writes.push(PathWrite::increment(path(field::AVAILABLE_COPIES), difference));

        match self.store.guarded_update(&guards, &path_writes).await? {
            WriteOutcome::Applied => {
                info!(book = %id, copies = new_copies, difference, "book copies changed");
                Ok(())
            }
            WriteOutcome::Rejected { guard, .. } => Err(CatalogError::Conflict(guard.to_string())),
        }
    }

    /// Remove a book that has no active checkouts.
    pub async fn delete_book(&self, id: &BookId) -> CatalogResult<()> {
        let active = self.active_transactions_for(tx_field::BOOK_ID, id.as_str()).await?;
        if active > 0 {
            return Err(CatalogError::HasActiveTransactions {
                entity: "book",
                id: id.to_string(),
                count: active,
            });
        }
        if !self.store.delete(Collection::Books, id.as_str()).await? {
            return Err(CatalogError::BookNotFound(id.clone()));
        }
        info!(book = %id, "book deleted");
        Ok(())
    }

    /// The newest `limit` books, newest first.
    pub async fn list_books(&self, limit: usize) -> CatalogResult<Vec<Book>> {
        let mut books: Vec<Book> =
            typed::scan(self.store.as_ref(), Collection::Books, Some(limit)).await?;
        books.reverse();
        Ok(books)
    }

    /// Case-insensitive substring search on one field. A blank query matches
    /// nothing.
    pub async fn search_books(
        &self,
        query: &str,
        on: BookSearchField,
    ) -> CatalogResult<Vec<Book>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let books: Vec<Book> = typed::scan(self.store.as_ref(), Collection::Books, None).await?;
        let hits: Vec<Book> = books
            .into_iter()
            .filter(|b| on.value_of(b).to_lowercase().contains(&needle))
            .collect();
        debug!(query = %needle, field = ?on, hits = hits.len(), "book search");
        Ok(hits)
    }

    pub async fn update_book_status(&self, id: &BookId, status: BookStatus) -> CatalogResult<()> {
        self.store
            .update(
                Collection::Books,
                id.as_str(),
                vec![
                    (field::STATUS.into(), FieldWrite::Set(Value::from(status.as_str()))),
                    (field::UPDATED_AT.into(), FieldWrite::ServerTimestamp),
                ],
            )
            .await
            .map_err(|e| book_not_found(e, id))
    }

    pub async fn books_by_status(&self, status: BookStatus) -> CatalogResult<Vec<Book>> {
        Ok(typed::query(
            self.store.as_ref(),
            Collection::Books,
            field::STATUS,
            &Value::from(status.as_str()),
        )
        .await?)
    }

    pub(crate) async fn active_transactions_for(
        &self,
        on_field: &str,
        key: &str,
    ) -> CatalogResult<usize> {
        let transactions: Vec<Transaction> = typed::query(
            self.store.as_ref(),
            Collection::Transactions,
            on_field,
            &Value::from(key),
        )
        .await?;
        Ok(transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Active)
            .count())
    }
}

fn book_not_found(err: StoreError, id: &BookId) -> CatalogError {
    match err {
        StoreError::NotFound { .. } => CatalogError::BookNotFound(id.clone()),
        other => other.into(),
    }
}
