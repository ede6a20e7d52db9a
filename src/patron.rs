use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CirculationError, Entity};

/// Default number of books a patron may hold at once
pub const DEFAULT_CHECKOUT_LIMIT: usize = 5;

/// One loan in a patron's history
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BorrowingRecord {
    /// The book lent
    isbn: String,
    /// When it was checked out
    checked_out_at: DateTime<Utc>,
    /// When it came back, if it has
    returned_at: Option<DateTime<Utc>>,
}

impl BorrowingRecord {
    /// The book lent
    #[must_use]
    pub fn isbn(&self) -> &str {
        &self.isbn
    }

    /// When the loan began
    #[must_use]
    pub fn checked_out_at(&self) -> DateTime<Utc> {
        self.checked_out_at
    }

    /// When the loan ended
    #[must_use]
    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    /// Whether the book has come back
    #[must_use]
    pub fn is_returned(&self) -> bool {
        self.returned_at.is_some()
    }
}

/// A registered borrower of one branch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Patron {
    /// Patron key
    patron_id: String,
    /// Display name
    name: String,
    /// Contact email
    email: Option<String>,
    /// Contact phone number
    phone: Option<String>,
    /// Maximum simultaneous checkouts
    checkout_limit: usize,
    /// ISBNs currently on loan
    current_checkouts: BTreeSet<String>,
    /// Every loan, oldest first
    borrowing_history: Vec<BorrowingRecord>,
}

/// Contact details that may change after registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatronUpdate {
    /// New display name
    pub name: Option<String>,
    /// New email; `Some(None)` clears it
    pub email: Option<Option<String>>,
    /// New phone number; `Some(None)` clears it
    pub phone: Option<Option<String>>,
}

impl Patron {
    /// Register a patron with the default checkout limit.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidField` if the id or name is blank.
    pub fn new(patron_id: impl Into<String>, name: impl Into<String>) -> Result<Self, CirculationError> {
        let patron_id = patron_id.into();
        let name = name.into();
        if patron_id.trim().is_empty() {
            return Err(CirculationError::InvalidField { entity: Entity::Patron, field: "patron_id" });
        }
        if name.trim().is_empty() {
            return Err(CirculationError::InvalidField { entity: Entity::Patron, field: "name" });
        }
        Ok(Self {
            patron_id,
            name,
            email: None,
            phone: None,
            checkout_limit: DEFAULT_CHECKOUT_LIMIT,
            current_checkouts: BTreeSet::new(),
            borrowing_history: Vec::new(),
        })
    }

    /// Set the contact email
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the contact phone number
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Override the number of books the patron may hold at once
    #[must_use]
    pub fn with_checkout_limit(mut self, limit: usize) -> Self {
        self.checkout_limit = limit;
        self
    }

    /// Patron key
    #[must_use]
    pub fn patron_id(&self) -> &str {
        &self.patron_id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contact email
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Contact phone number
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// Maximum simultaneous checkouts
    #[must_use]
    pub fn checkout_limit(&self) -> usize {
        self.checkout_limit
    }

    /// ISBNs currently on loan
    #[must_use]
    pub fn current_checkouts(&self) -> &BTreeSet<String> {
        &self.current_checkouts
    }

    /// Number of books currently on loan
    #[must_use]
    pub fn checkout_count(&self) -> usize {
        self.current_checkouts.len()
    }

    /// Every loan, oldest first
    #[must_use]
    pub fn borrowing_history(&self) -> &[BorrowingRecord] {
        &self.borrowing_history
    }

    /// Whether another checkout would stay within the limit
    #[must_use]
    pub fn can_checkout_more(&self) -> bool {
        self.current_checkouts.len() < self.checkout_limit
    }

    /// Whether the patron currently holds `isbn`
    #[must_use]
    pub fn holds(&self, isbn: &str) -> bool {
        self.current_checkouts.contains(isbn)
    }

    /// The unreturned loan of `isbn`, if any
    #[must_use]
    pub fn open_record(&self, isbn: &str) -> Option<&BorrowingRecord> {
        self.borrowing_history.iter().find(|record| record.isbn == isbn && !record.is_returned())
    }

    /// Start a loan. Callers check the limit first.
    pub(crate) fn begin_loan(&mut self, isbn: &str, at: DateTime<Utc>) {
        self.current_checkouts.insert(isbn.to_owned());
        self.borrowing_history.push(BorrowingRecord {
            isbn: isbn.to_owned(),
            checked_out_at: at,
            returned_at: None,
        });
    }

    /// End a loan, closing the first open record for `isbn`
    pub(crate) fn end_loan(&mut self, isbn: &str, at: DateTime<Utc>) {
        self.current_checkouts.remove(isbn);
        if let Some(record) =
            self.borrowing_history.iter_mut().find(|record| record.isbn == isbn && !record.is_returned())
        {
            record.returned_at = Some(at);
        }
    }

    /// Undo `end_loan`: re-add the checkout and reopen the latest closed record
    pub(crate) fn reopen_loan(&mut self, isbn: &str) {
        self.current_checkouts.insert(isbn.to_owned());
        if let Some(record) =
            self.borrowing_history.iter_mut().rev().find(|record| record.isbn == isbn && record.is_returned())
        {
            record.returned_at = None;
        }
    }

    /// Apply contact detail changes
    pub(crate) fn apply_update(&mut self, update: PatronUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(phone) = update.phone {
            self.phone = phone;
        }
    }
}
