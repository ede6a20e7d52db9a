use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    book_status::BookStatus,
    error::{CirculationError, Entity, StateViolation},
    events::BookEvent,
};

/// A catalogued copy of a title
///
/// The ISBN, author and publication year never change. Status and branch
/// membership change only through circulation operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Book {
    /// Catalog key
    isbn: String,
    /// Title shown to patrons
    title: String,
    /// Author credit
    author: String,
    /// Year of publication
    publication_year: i32,
    /// Circulation status
    status: BookStatus,
    /// Branch whose inventory lists the book, if any
    current_branch: Option<String>,
}

/// Descriptive fields that may be corrected after cataloguing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookUpdate {
    /// New title, if changing
    pub title: Option<String>,
    /// New author credit, if changing
    pub author: Option<String>,
}

impl Book {
    /// Catalogue a new, available book that no branch lists yet.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidField` if the ISBN or title is blank.
    pub fn new(
        isbn: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        publication_year: i32,
    ) -> Result<Self, CirculationError> {
        let isbn = isbn.into();
        let title = title.into();
        if isbn.trim().is_empty() {
            return Err(CirculationError::InvalidField { entity: Entity::Book, field: "isbn" });
        }
        if title.trim().is_empty() {
            return Err(CirculationError::InvalidField { entity: Entity::Book, field: "title" });
        }
        Ok(Self {
            isbn,
            title,
            author: author.into(),
            publication_year,
            status: BookStatus::Available,
            current_branch: None,
        })
    }

    /// Catalog key
    #[must_use]
    pub fn isbn(&self) -> &str {
        &self.isbn
    }

    /// Title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Author credit
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Year of publication
    #[must_use]
    pub fn publication_year(&self) -> i32 {
        self.publication_year
    }

    /// Circulation status
    #[must_use]
    pub fn status(&self) -> BookStatus {
        self.status
    }

    /// Branch whose inventory lists the book
    #[must_use]
    pub fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    /// Whether the book can be checked out by anyone
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available
    }

    /// Move the book along its lifecycle.
    ///
    /// `violation` names the precondition reported when the lifecycle has no
    /// edge for `event` from the current status.
    pub(crate) fn apply(
        &mut self,
        event: BookEvent,
        violation: StateViolation,
    ) -> Result<BookStatus, CirculationError> {
        let next = self
            .status
            .next(event)
            .ok_or_else(|| CirculationError::invalid_state(&self.isbn, self.status, violation))?;
        debug!(isbn = %self.isbn, from = %self.status, to = %next, %event, "book status changed");
        self.status = next;
        Ok(next)
    }

    /// Put back a status recorded before an operation that is being undone
    pub(crate) fn restore_status(&mut self, status: BookStatus) {
        debug!(isbn = %self.isbn, from = %self.status, to = %status, "book status restored");
        self.status = status;
    }

    /// Record which branch lists the book
    pub(crate) fn set_branch(&mut self, branch_id: Option<&str>) {
        self.current_branch = branch_id.map(str::to_owned);
    }

    /// Apply descriptive corrections
    pub(crate) fn apply_update(&mut self, update: BookUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(author) = update.author {
            self.author = author;
        }
    }
}
