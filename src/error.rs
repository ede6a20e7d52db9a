//! Error types for circulation operations.
//!
//! Every failure is a synchronous business-rule violation detected before any
//! state is touched. The engine never retries; callers match on
//! [`CirculationError::kind`] and decide.

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::book_status::BookStatus;

/// The kind of record a key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A book, keyed by ISBN
    Book,
    /// A patron, keyed by patron id
    Patron,
    /// A branch, keyed by branch id
    Branch,
    /// A transaction, keyed by its generated id
    Transaction,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Book => "book",
            Self::Patron => "patron",
            Self::Branch => "branch",
            Self::Transaction => "transaction",
        };
        f.write_str(label)
    }
}

/// Which status precondition an operation violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateViolation {
    /// Checkout of a book that is not on the shelf
    NotAvailable,
    /// Return of a book that is not checked out
    NotCheckedOut,
    /// Removal of a book that is circulating or held
    InUse,
    /// Checkout of a held book by someone other than the notified patron
    HeldForAnotherPatron,
    /// Transfer of a checked-out book
    CheckedOutInTransfer,
    /// Transfer of a book that has patrons waiting for it
    HeldForWaitlist,
    /// Compensation of an operation whose effects were already superseded
    StaleCompensation,
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotAvailable => "it is not available",
            Self::NotCheckedOut => "it is not checked out",
            Self::InUse => "it is in use",
            Self::HeldForAnotherPatron => "it is held for another patron",
            Self::CheckedOutInTransfer => "a checked-out book cannot be transferred",
            Self::HeldForWaitlist => "patrons are waiting for it",
            Self::StaleCompensation => "the operation to undo has been superseded",
        };
        f.write_str(label)
    }
}

/// Flat classification of [`CirculationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Book, patron, branch or transaction absent
    NotFound,
    /// Duplicate key on add
    AlreadyExists,
    /// Book status precondition violated
    InvalidState,
    /// Patron checkout bound reached
    LimitExceeded,
    /// Return by a patron who does not hold the book
    WrongHolder,
    /// Reservation of a book that can simply be checked out
    ReservationNotNeeded,
    /// Cancellation of a reservation that does not exist
    NoSuchReservation,
    /// Malformed record passed to a constructor
    InvalidInput,
    /// A branch lock could not be acquired in time
    Busy,
}

/// Errors raised by the circulation engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CirculationError {
    /// The keyed record does not exist
    #[error("{entity} not found: {key}")]
    NotFound {
        /// What kind of record was looked up
        entity: Entity,
        /// The key that missed
        key: String,
    },
    /// A record with this key is already present
    #[error("{entity} already exists: {key}")]
    AlreadyExists {
        /// What kind of record was added
        entity: Entity,
        /// The duplicate key
        key: String,
    },
    /// The book's status forbids the operation
    #[error("book {isbn} is {status}: {violation}")]
    InvalidState {
        /// The book concerned
        isbn: String,
        /// Its status at the time of the call
        status: BookStatus,
        /// The precondition that failed
        violation: StateViolation,
    },
    /// The patron already holds as many books as allowed
    #[error("patron {patron_id} has reached the checkout limit of {limit}")]
    LimitExceeded {
        /// The patron at the bound
        patron_id: String,
        /// The bound
        limit: usize,
    },
    /// The patron returning the book is not the one holding it
    #[error("patron {patron_id} does not hold book {isbn}")]
    WrongHolder {
        /// The book being returned
        isbn: String,
        /// The patron who tried to return it
        patron_id: String,
    },
    /// The book is available; check it out instead
    #[error("book {isbn} is available, no reservation needed")]
    ReservationNotNeeded {
        /// The available book
        isbn: String,
    },
    /// The patron is not waiting for the book
    #[error("patron {patron_id} has no reservation for book {isbn}")]
    NoSuchReservation {
        /// The book
        isbn: String,
        /// The patron
        patron_id: String,
    },
    /// The title has nobody waiting for it
    #[error("book {isbn} has no waitlist")]
    NoWaitlist {
        /// The book
        isbn: String,
    },
    /// A required field was empty
    #[error("{entity} {field} cannot be empty")]
    InvalidField {
        /// The record being built
        entity: Entity,
        /// The offending field
        field: &'static str,
    },
    /// A branch lock could not be acquired within the configured timeout
    #[error("timed out after {waited:?} waiting for branch {branch_id}")]
    LockTimeout {
        /// The contended branch
        branch_id: String,
        /// How long the caller waited
        waited: Duration,
    },
}

impl CirculationError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::WrongHolder { .. } => ErrorKind::WrongHolder,
            Self::ReservationNotNeeded { .. } => ErrorKind::ReservationNotNeeded,
            Self::NoSuchReservation { .. } | Self::NoWaitlist { .. } => ErrorKind::NoSuchReservation,
            Self::InvalidField { .. } => ErrorKind::InvalidInput,
            Self::LockTimeout { .. } => ErrorKind::Busy,
        }
    }

    /// Build a `NotFound` error
    pub(crate) fn not_found(entity: Entity, key: &str) -> Self {
        Self::NotFound { entity, key: key.to_owned() }
    }

    /// Build an `AlreadyExists` error
    pub(crate) fn already_exists(entity: Entity, key: &str) -> Self {
        Self::AlreadyExists { entity, key: key.to_owned() }
    }

    /// Build an `InvalidState` error
    pub(crate) fn invalid_state(isbn: &str, status: BookStatus, violation: StateViolation) -> Self {
        Self::InvalidState { isbn: isbn.to_owned(), status, violation }
    }
}
