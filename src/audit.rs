//! Invariant checks over branches and the transfer journal.
//!
//! An [`Anomaly`] describes state that the circulation operations should never
//! produce. The checks only read; reconciling what they find is left to an
//! operator.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    book::Book,
    book_status::BookStatus,
    branch::BranchInventory,
    registry::{TransferPhase, TransferRecord},
};

/// A broken circulation invariant
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "anomaly", rename_all = "snake_case")]
pub enum Anomaly {
    /// A CHECKED_OUT book that no patron holds
    CheckedOutWithoutHolder {
        /// Branch listing the book
        branch_id: String,
        /// The book
        isbn: String,
    },
    /// A CHECKED_OUT book held by more than one patron
    SeveralHolders {
        /// Branch listing the book
        branch_id: String,
        /// The book
        isbn: String,
        /// Every patron holding it
        patron_ids: Vec<String>,
    },
    /// A patron holding a book that is not checked out in their branch
    HolderOfShelvedBook {
        /// Branch of the patron
        branch_id: String,
        /// The patron
        patron_id: String,
        /// The book they hold
        isbn: String,
        /// Status of that book, if it is listed at all
        status: Option<BookStatus>,
    },
    /// A patron over their checkout limit
    LimitBreached {
        /// Branch of the patron
        branch_id: String,
        /// The patron
        patron_id: String,
        /// Books currently held
        count: usize,
        /// Their limit
        limit: usize,
    },
    /// A held book without an open borrowing record
    MissingBorrowingRecord {
        /// Branch of the patron
        branch_id: String,
        /// The patron
        patron_id: String,
        /// The book they hold
        isbn: String,
    },
    /// Unreturned borrowing records beyond the patron's current checkout
    DanglingBorrowingRecord {
        /// Branch of the patron
        branch_id: String,
        /// The patron
        patron_id: String,
        /// The book the records name
        isbn: String,
        /// Records for the book still without a return timestamp
        open_records: usize,
    },
    /// A listed book whose branch reference points elsewhere
    BranchMismatch {
        /// Branch listing the book
        branch_id: String,
        /// The book
        isbn: String,
        /// Branch recorded on the book
        recorded: Option<String>,
    },
    /// A RESERVED book with no one holding the hold
    ReservedWithoutHold {
        /// Branch listing the book
        branch_id: String,
        /// The book
        isbn: String,
    },
    /// An IN_TRANSIT book still listed by a branch
    InTransitListed {
        /// Branch listing the book
        branch_id: String,
        /// The book
        isbn: String,
    },
    /// One key listed by several branches
    ListedInSeveralBranches {
        /// The book
        isbn: String,
        /// Every branch listing it
        branch_ids: Vec<String>,
    },
    /// A transfer that left its source and never reached its destination
    StrandedTransfer {
        /// Journal entry of the transfer
        transfer_id: Uuid,
        /// The book in flight
        isbn: String,
        /// Source branch
        from_branch: String,
        /// Destination branch
        to_branch: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckedOutWithoutHolder { branch_id, isbn } => {
                write!(f, "[{branch_id}] {isbn} is checked out but nobody holds it")
            }
            Self::SeveralHolders { branch_id, isbn, patron_ids } => {
                write!(f, "[{branch_id}] {isbn} is held by {}", patron_ids.join(", "))
            }
            Self::HolderOfShelvedBook { branch_id, patron_id, isbn, status } => match status {
                Some(status) => write!(f, "[{branch_id}] {patron_id} holds {isbn} which is {status}"),
                None => write!(f, "[{branch_id}] {patron_id} holds unlisted book {isbn}"),
            },
            Self::LimitBreached { branch_id, patron_id, count, limit } => {
                write!(f, "[{branch_id}] {patron_id} holds {count} books, limit {limit}")
            }
            Self::MissingBorrowingRecord { branch_id, patron_id, isbn } => {
                write!(f, "[{branch_id}] {patron_id} holds {isbn} without an open borrowing record")
            }
            Self::DanglingBorrowingRecord { branch_id, patron_id, isbn, open_records } => write!(
                f,
                "[{branch_id}] {patron_id} has {open_records} unreturned records for {isbn}"
            ),
            Self::BranchMismatch { branch_id, isbn, recorded } => write!(
                f,
                "[{branch_id}] {isbn} records branch {}",
                recorded.as_deref().unwrap_or("none")
            ),
            Self::ReservedWithoutHold { branch_id, isbn } => {
                write!(f, "[{branch_id}] {isbn} is reserved for nobody")
            }
            Self::InTransitListed { branch_id, isbn } => {
                write!(f, "[{branch_id}] {isbn} is listed while in transit")
            }
            Self::ListedInSeveralBranches { isbn, branch_ids } => {
                write!(f, "{isbn} is listed by {}", branch_ids.join(", "))
            }
            Self::StrandedTransfer { transfer_id, isbn, from_branch, to_branch } => {
                write!(f, "transfer {transfer_id} of {isbn} from {from_branch} to {to_branch} never arrived")
            }
        }
    }
}

/// Check one branch's book, patron and waitlist maps against each other
#[must_use]
pub fn audit_branch(branch: &BranchInventory) -> Vec<Anomaly> {
    let branch_id = branch.branch_id();
    let mut anomalies = Vec::new();

    let mut holders: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for patron in branch.patrons() {
        let count = patron.checkout_count();
        if count > patron.checkout_limit() {
            anomalies.push(Anomaly::LimitBreached {
                branch_id: branch_id.to_owned(),
                patron_id: patron.patron_id().to_owned(),
                count,
                limit: patron.checkout_limit(),
            });
        }
        let mut open: BTreeMap<&str, usize> = BTreeMap::new();
        for record in patron.borrowing_history().iter().filter(|record| !record.is_returned()) {
            let count = open.entry(record.isbn()).or_default();
            *count = count.saturating_add(1);
        }
        for (isbn, open_records) in open {
            let allowed = usize::from(patron.holds(isbn));
            if open_records > allowed {
                anomalies.push(Anomaly::DanglingBorrowingRecord {
                    branch_id: branch_id.to_owned(),
                    patron_id: patron.patron_id().to_owned(),
                    isbn: isbn.to_owned(),
                    open_records,
                });
            }
        }
        for isbn in patron.current_checkouts() {
            holders.entry(isbn.as_str()).or_default().push(patron.patron_id().to_owned());
            if patron.open_record(isbn).is_none() {
                anomalies.push(Anomaly::MissingBorrowingRecord {
                    branch_id: branch_id.to_owned(),
                    patron_id: patron.patron_id().to_owned(),
                    isbn: isbn.clone(),
                });
            }
            let status = branch.book(isbn).map(Book::status);
            if status != Some(BookStatus::CheckedOut) {
                anomalies.push(Anomaly::HolderOfShelvedBook {
                    branch_id: branch_id.to_owned(),
                    patron_id: patron.patron_id().to_owned(),
                    isbn: isbn.clone(),
                    status,
                });
            }
        }
    }

    for book in branch.books() {
        let isbn = book.isbn();
        if book.current_branch() != Some(branch_id) {
            anomalies.push(Anomaly::BranchMismatch {
                branch_id: branch_id.to_owned(),
                isbn: isbn.to_owned(),
                recorded: book.current_branch().map(str::to_owned),
            });
        }
        match book.status() {
            BookStatus::CheckedOut => match holders.get(isbn).map(Vec::as_slice) {
                None | Some([]) => anomalies.push(Anomaly::CheckedOutWithoutHolder {
                    branch_id: branch_id.to_owned(),
                    isbn: isbn.to_owned(),
                }),
                Some([_]) => {}
                Some(several) => anomalies.push(Anomaly::SeveralHolders {
                    branch_id: branch_id.to_owned(),
                    isbn: isbn.to_owned(),
                    patron_ids: several.to_vec(),
                }),
            },
            BookStatus::Reserved => {
                if !branch.waitlist(isbn).is_some_and(|manager| manager.hold().is_some()) {
                    anomalies.push(Anomaly::ReservedWithoutHold {
                        branch_id: branch_id.to_owned(),
                        isbn: isbn.to_owned(),
                    });
                }
            }
            BookStatus::InTransit => anomalies.push(Anomaly::InTransitListed {
                branch_id: branch_id.to_owned(),
                isbn: isbn.to_owned(),
            }),
            BookStatus::Available => {}
        }
    }

    for anomaly in &anomalies {
        warn!(%anomaly, "circulation anomaly");
    }
    anomalies
}

/// Check every branch, keys listed twice and transfers stranded in flight
#[must_use]
pub fn audit_registry(branches: &[&BranchInventory], journal: &[TransferRecord]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let mut listings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for branch in branches.iter().copied() {
        anomalies.extend(audit_branch(branch));
        for book in branch.books() {
            listings.entry(book.isbn().to_owned()).or_default().insert(branch.branch_id().to_owned());
        }
    }

    for (isbn, branch_ids) in listings {
        if branch_ids.len() > 1 {
            let anomaly =
                Anomaly::ListedInSeveralBranches { isbn, branch_ids: branch_ids.into_iter().collect() };
            warn!(%anomaly, "circulation anomaly");
            anomalies.push(anomaly);
        }
    }

    for record in journal.iter().filter(|record| record.phase == TransferPhase::Departed) {
        let anomaly = Anomaly::StrandedTransfer {
            transfer_id: record.id,
            isbn: record.isbn.clone(),
            from_branch: record.from_branch.clone(),
            to_branch: record.to_branch.clone(),
        };
        warn!(%anomaly, "circulation anomaly");
        anomalies.push(anomaly);
    }
    anomalies
}
