use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a transaction lent a book or took it back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// A book left the shelf with a patron
    Checkout,
    /// A book came back
    Return,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkout => f.write_str("CHECKOUT"),
            Self::Return => f.write_str("RETURN"),
        }
    }
}

/// An entry in a branch's append-only circulation log
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Transaction {
    /// Generated identifier
    id: Uuid,
    /// The book concerned
    isbn: String,
    /// The patron concerned
    patron_id: String,
    /// Checkout or return
    kind: TransactionKind,
    /// When the transaction happened
    occurred_at: DateTime<Utc>,
    /// When a checkout falls due
    due_at: Option<DateTime<Utc>>,
    /// When a checkout was closed by a return
    returned_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} by {}", self.kind, self.isbn, self.patron_id)?;
        if let Some(due) = self.due_at {
            write!(f, ", due {}", due.format("%Y-%m-%d"))?;
        }
        Ok(())
    }
}

impl Transaction {
    /// A checkout due `loan_period` after `at`
    pub(crate) fn checkout(isbn: &str, patron_id: &str, at: DateTime<Utc>, loan_period: TimeDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            isbn: isbn.to_owned(),
            patron_id: patron_id.to_owned(),
            kind: TransactionKind::Checkout,
            occurred_at: at,
            due_at: Some(at.checked_add_signed(loan_period).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            returned_at: None,
        }
    }

    /// A return at `at`
    pub(crate) fn checkin(isbn: &str, patron_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            isbn: isbn.to_owned(),
            patron_id: patron_id.to_owned(),
            kind: TransactionKind::Return,
            occurred_at: at,
            due_at: None,
            returned_at: None,
        }
    }

    /// Generated identifier
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The book concerned
    #[must_use]
    pub fn isbn(&self) -> &str {
        &self.isbn
    }

    /// The patron concerned
    #[must_use]
    pub fn patron_id(&self) -> &str {
        &self.patron_id
    }

    /// Checkout or return
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// When the transaction happened
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Due date of a checkout
    #[must_use]
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    /// When a checkout was closed
    #[must_use]
    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    /// A checkout is overdue once its due date has passed without a return.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match (self.due_at, self.returned_at) {
            (Some(due), None) => due < now,
            _ => false,
        }
    }

    /// Whether this is a checkout of `isbn` by `patron_id` still awaiting return
    pub(crate) fn is_open_checkout(&self, isbn: &str, patron_id: &str) -> bool {
        self.kind == TransactionKind::Checkout
            && self.returned_at.is_none()
            && self.isbn == isbn
            && self.patron_id == patron_id
    }

    /// Mark a checkout as returned
    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.returned_at = Some(at);
    }

    /// Clear the return mark of a checkout
    pub(crate) fn reopen(&mut self) {
        self.returned_at = None;
    }
}
