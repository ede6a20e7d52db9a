//! Checkout and return as validate-then-apply state transitions.
//!
//! Each executor checks every precondition before touching the book, the
//! patron or the ledger, so a failure leaves all three as they were. A
//! successful call yields the logged transaction plus a [`Compensation`] that
//! can reverse the effect later.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    book::Book,
    book_status::BookStatus,
    error::{CirculationError, StateViolation},
    events::BookEvent,
    patron::Patron,
    transaction::Transaction,
};

/// The reversal of one executed checkout or return
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Compensation {
    /// Put a checked-out book back on the shelf
    UndoCheckout {
        /// The book lent
        isbn: String,
        /// The borrower
        patron_id: String,
        /// The checkout transaction being compensated
        transaction_id: Uuid,
    },
    /// Give a returned book back to its borrower
    UndoReturn {
        /// The book returned
        isbn: String,
        /// The borrower
        patron_id: String,
        /// The checkout transaction the return closed, if one was found
        closed_checkout: Option<Uuid>,
    },
}

impl Compensation {
    /// The book the compensation applies to
    #[must_use]
    pub fn isbn(&self) -> &str {
        match self {
            Self::UndoCheckout { isbn, .. } | Self::UndoReturn { isbn, .. } => isbn,
        }
    }

    /// The patron the compensation applies to
    #[must_use]
    pub fn patron_id(&self) -> &str {
        match self {
            Self::UndoCheckout { patron_id, .. } | Self::UndoReturn { patron_id, .. } => patron_id,
        }
    }
}

/// Result of a successful checkout or return
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The transaction appended to the branch log
    pub transaction: Transaction,
    /// How to reverse the operation
    pub compensation: Compensation,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.transaction, f)
    }
}

/// Lend `book` to `patron`, appending a CHECKOUT to `ledger`.
///
/// The book must be AVAILABLE, or RESERVED when the caller has already
/// established that `patron` is the one it is held for.
pub(crate) fn checkout(
    book: &mut Book,
    patron: &mut Patron,
    ledger: &mut Vec<Transaction>,
    at: DateTime<Utc>,
    loan_period: TimeDelta,
) -> Result<Receipt, CirculationError> {
    if book.status().next(BookEvent::CheckOut).is_none() {
        return Err(CirculationError::invalid_state(
            book.isbn(),
            book.status(),
            StateViolation::NotAvailable,
        ));
    }
    if !patron.can_checkout_more() {
        return Err(CirculationError::LimitExceeded {
            patron_id: patron.patron_id().to_owned(),
            limit: patron.checkout_limit(),
        });
    }

    book.apply(BookEvent::CheckOut, StateViolation::NotAvailable)?;
    patron.begin_loan(book.isbn(), at);
    let transaction = Transaction::checkout(book.isbn(), patron.patron_id(), at, loan_period);
    ledger.push(transaction.clone());

    info!(isbn = book.isbn(), patron = patron.patron_id(), due = ?transaction.due_at(), "checkout executed");
    Ok(Receipt {
        compensation: Compensation::UndoCheckout {
            isbn: book.isbn().to_owned(),
            patron_id: patron.patron_id().to_owned(),
            transaction_id: transaction.id(),
        },
        transaction,
    })
}

/// Take `book` back from `patron`, appending a RETURN to `ledger`.
///
/// Leaves the book AVAILABLE; the caller hands it to the waitlist afterwards.
pub(crate) fn checkin(
    book: &mut Book,
    patron: &mut Patron,
    ledger: &mut Vec<Transaction>,
    at: DateTime<Utc>,
) -> Result<Receipt, CirculationError> {
    if book.status() != BookStatus::CheckedOut {
        return Err(CirculationError::invalid_state(
            book.isbn(),
            book.status(),
            StateViolation::NotCheckedOut,
        ));
    }
    if !patron.holds(book.isbn()) {
        return Err(CirculationError::WrongHolder {
            isbn: book.isbn().to_owned(),
            patron_id: patron.patron_id().to_owned(),
        });
    }

    book.apply(BookEvent::Return, StateViolation::NotCheckedOut)?;
    patron.end_loan(book.isbn(), at);
    let closed_checkout = ledger
        .iter_mut()
        .rev()
        .find(|tx| tx.is_open_checkout(book.isbn(), patron.patron_id()))
        .map(|tx| {
            tx.close(at);
            tx.id()
        });
    let transaction = Transaction::checkin(book.isbn(), patron.patron_id(), at);
    ledger.push(transaction.clone());

    info!(isbn = book.isbn(), patron = patron.patron_id(), "return executed");
    Ok(Receipt {
        transaction,
        compensation: Compensation::UndoReturn {
            isbn: book.isbn().to_owned(),
            patron_id: patron.patron_id().to_owned(),
            closed_checkout,
        },
    })
}

/// Reverse an executed checkout or return.
///
/// The log and the borrowing history keep every entry. Undoing a checkout
/// closes its record and transaction at `at`; undoing a return clears the
/// return mark it set.
pub(crate) fn compensate(
    compensation: &Compensation,
    book: &mut Book,
    patron: &mut Patron,
    ledger: &mut [Transaction],
    at: DateTime<Utc>,
) -> Result<(), CirculationError> {
    match compensation {
        Compensation::UndoCheckout { isbn, transaction_id, .. } => {
            if book.status() != BookStatus::CheckedOut || !patron.holds(isbn) {
                return Err(CirculationError::invalid_state(
                    isbn,
                    book.status(),
                    StateViolation::StaleCompensation,
                ));
            }
            book.restore_status(BookStatus::Available);
            patron.end_loan(isbn, at);
            if let Some(tx) = ledger.iter_mut().find(|tx| tx.id() == *transaction_id) {
                tx.close(at);
            }
            info!(isbn = %isbn, patron = patron.patron_id(), "checkout undone");
        }
        Compensation::UndoReturn { isbn, closed_checkout, .. } => {
            let shelved = matches!(book.status(), BookStatus::Available | BookStatus::Reserved);
            if !shelved || patron.holds(isbn) {
                return Err(CirculationError::invalid_state(
                    isbn,
                    book.status(),
                    StateViolation::StaleCompensation,
                ));
            }
            if !patron.can_checkout_more() {
                return Err(CirculationError::LimitExceeded {
                    patron_id: patron.patron_id().to_owned(),
                    limit: patron.checkout_limit(),
                });
            }
            book.restore_status(BookStatus::CheckedOut);
            patron.reopen_loan(isbn);
            if let Some(id) = closed_checkout {
                if let Some(tx) = ledger.iter_mut().find(|tx| tx.id() == *id) {
                    tx.reopen();
                }
            }
            info!(isbn = %isbn, patron = patron.patron_id(), "return undone");
        }
    }
    Ok(())
}
