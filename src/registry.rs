//! The multi-branch registry and the cross-branch transfer protocol.
//!
//! A transfer delists the book at its source, marks it IN_TRANSIT with the
//! destination as its branch, lists it at the destination and shelves it
//! there. Each attempt that gets past validation leaves a [`TransferRecord`]
//! in the journal, so a book that left its source but never arrived can be
//! told apart from one that never moved.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit::{self, Anomaly},
    book::Book,
    branch::{BranchInventory, Refused},
    error::{CirculationError, Entity},
    snapshot::RegistrySnapshot,
};

/// How far a transfer got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferPhase {
    /// Delisted at the source, not yet listed at the destination
    Departed,
    /// Listed and shelved at the destination
    Completed,
    /// Refused by the destination and restored to the source
    RolledBack,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Departed => f.write_str("DEPARTED"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::RolledBack => f.write_str("ROLLED_BACK"),
        }
    }
}

/// Journal entry for one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferRecord {
    /// Generated identifier
    pub id: Uuid,
    /// The book moved
    pub isbn: String,
    /// Source branch
    pub from_branch: String,
    /// Destination branch
    pub to_branch: String,
    /// How far the transfer got
    pub phase: TransferPhase,
    /// When the book left the source
    pub started_at: DateTime<Utc>,
    /// When the transfer completed or was rolled back
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// A transfer that has just left its source
    pub(crate) fn departed(isbn: &str, from_branch: &str, to_branch: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            isbn: isbn.to_owned(),
            from_branch: from_branch.to_owned(),
            to_branch: to_branch.to_owned(),
            phase: TransferPhase::Departed,
            started_at: at,
            finished_at: None,
        }
    }

    /// Record the final phase
    fn finish(&mut self, phase: TransferPhase, at: DateTime<Utc>) {
        self.phase = phase;
        self.finished_at = Some(at);
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {} ({})", self.isbn, self.from_branch, self.to_branch, self.phase)
    }
}

/// Move `isbn` from `source` to `destination`, journalling the attempt.
///
/// Both branches are validated before anything is removed, so a failed
/// validation leaves the book where it was and the journal untouched.
pub(crate) fn move_book(
    source: &mut BranchInventory,
    destination: &mut BranchInventory,
    isbn: &str,
    journal: &mut Vec<TransferRecord>,
) -> Result<TransferRecord, CirculationError> {
    source.check_departure(isbn)?;
    destination.check_arrival(isbn)?;

    let book = source.dispatch(isbn, destination.branch_id())?;
    let mut record =
        TransferRecord::departed(isbn, source.branch_id(), destination.branch_id(), source.now());

    let outcome = match destination.receive(book) {
        Ok(()) => {
            record.finish(TransferPhase::Completed, destination.now());
            info!(isbn, from = source.branch_id(), to = destination.branch_id(), "transfer completed");
            Ok(record.clone())
        }
        Err(Refused { error, book }) => {
            source.restore(book);
            record.finish(TransferPhase::RolledBack, source.now());
            warn!(isbn, from = source.branch_id(), %error, "transfer rolled back");
            Err(error)
        }
    };
    journal.push(record);
    outcome
}

/// Owns every branch of the library system.
///
/// Constructed explicitly and passed by reference; there is no process-wide
/// instance.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    /// Branches keyed by id
    branches: BTreeMap<String, BranchInventory>,
    /// Every transfer attempt that got past validation, oldest first
    journal: Vec<TransferRecord>,
}

impl SystemRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a branch.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a branch with the same id is registered.
    pub fn add_branch(&mut self, branch: BranchInventory) -> Result<(), CirculationError> {
        match self.branches.entry(branch.branch_id().to_owned()) {
            Entry::Occupied(_) => Err(CirculationError::already_exists(Entity::Branch, branch.branch_id())),
            Entry::Vacant(slot) => {
                info!(branch = branch.branch_id(), "branch registered");
                slot.insert(branch);
                Ok(())
            }
        }
    }

    /// Look up a branch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub fn branch(&self, branch_id: &str) -> Result<&BranchInventory, CirculationError> {
        self.branches.get(branch_id).ok_or_else(|| CirculationError::not_found(Entity::Branch, branch_id))
    }

    /// Look up a branch for mutation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub fn branch_mut(&mut self, branch_id: &str) -> Result<&mut BranchInventory, CirculationError> {
        self.branches
            .get_mut(branch_id)
            .ok_or_else(|| CirculationError::not_found(Entity::Branch, branch_id))
    }

    /// Every branch, ordered by id
    #[must_use]
    pub fn branches(&self) -> impl Iterator<Item = &BranchInventory> {
        self.branches.values()
    }

    /// The branch listing `isbn` together with the book
    #[must_use]
    pub fn find_book_across_branches(&self, isbn: &str) -> Option<(&BranchInventory, &Book)> {
        self.branches.values().find_map(|branch| branch.book(isbn).map(|book| (branch, book)))
    }

    /// Move a book from one branch to another.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown branch or a book the source does not
    /// list, `InvalidState` if the book is checked out or held for a waitlist
    /// and `AlreadyExists` if the destination already lists the key. A failed
    /// transfer leaves the book in its source branch.
    pub fn transfer(&mut self, isbn: &str, from: &str, to: &str) -> Result<TransferRecord, CirculationError> {
        if !self.branches.contains_key(to) {
            return Err(CirculationError::not_found(Entity::Branch, to));
        }
        if from == to {
            let branch = self.branch(from)?;
            branch.check_departure(isbn)?;
            return Err(CirculationError::already_exists(Entity::Book, isbn));
        }
        // Take the source out of the map to hold both branches mutably.
        let mut source =
            self.branches.remove(from).ok_or_else(|| CirculationError::not_found(Entity::Branch, from))?;
        let outcome = match self.branches.get_mut(to) {
            Some(destination) => move_book(&mut source, destination, isbn, &mut self.journal),
            None => Err(CirculationError::not_found(Entity::Branch, to)),
        };
        self.branches.insert(from.to_owned(), source);
        outcome
    }

    /// Every transfer attempt that got past validation, oldest first
    #[must_use]
    pub fn transfers(&self) -> &[TransferRecord] {
        &self.journal
    }

    /// Check every branch and the transfer journal
    #[must_use]
    pub fn audit(&self) -> Vec<Anomaly> {
        let branches: Vec<&BranchInventory> = self.branches.values().collect();
        audit::audit_registry(&branches, &self.journal)
    }

    /// Export the whole registry for inspection
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let branches: Vec<&BranchInventory> = self.branches.values().collect();
        RegistrySnapshot::capture(&branches, &self.journal)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        book_status::BookStatus,
        error::{ErrorKind, StateViolation},
        test_support::branch_fixture,
    };

    /// Branch X lists B1 and B2 for patron P1; branch Y lists B3
    fn two_branches() -> SystemRegistry {
        let mut registry = SystemRegistry::new();
        registry.add_branch(branch_fixture("X", &["B1", "B2"], &["P1", "P2"]).branch).expect("branch X");
        registry.add_branch(branch_fixture("Y", &["B3"], &[]).branch).expect("branch Y");
        registry
    }

    #[test]
    fn duplicate_branch_ids_are_rejected() {
        let mut registry = two_branches();
        let result = registry.add_branch(branch_fixture("X", &[], &[]).branch);
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::AlreadyExists));
        assert_eq!(registry.branches().count(), 2);
    }

    #[test]
    fn transfer_moves_the_book_and_shelves_it() {
        let mut registry = two_branches();

        let record = registry.transfer("B1", "X", "Y").expect("transfer");

        assert_eq!(record.phase, TransferPhase::Completed);
        assert!(!registry.branch("X").expect("X").contains_book("B1"));
        let moved = registry.branch("Y").expect("Y").book("B1").expect("listed at Y");
        assert_eq!(moved.status(), BookStatus::Available);
        assert_eq!(moved.current_branch(), Some("Y"));
        assert_eq!(registry.transfers().len(), 1);
        assert!(registry.audit().is_empty());
    }

    #[test]
    fn checked_out_books_stay_put() {
        let mut registry = two_branches();
        registry.branch_mut("X").expect("X").checkout("B1", "P1").expect("checkout");

        let error = registry.transfer("B1", "X", "Y").expect_err("checked out");

        assert!(matches!(
            error,
            CirculationError::InvalidState { violation: StateViolation::CheckedOutInTransfer, .. }
        ));
        assert!(registry.branch("X").expect("X").contains_book("B1"));
        assert!(!registry.branch("Y").expect("Y").contains_book("B1"));
        assert!(registry.transfers().is_empty());
    }

    #[test]
    fn held_books_stay_put() {
        let mut registry = two_branches();
        let branch = registry.branch_mut("X").expect("X");
        branch.checkout("B1", "P1").expect("checkout");
        branch.reserve("B1", "P2").expect("reserve");
        branch.return_book("B1", "P1").expect("return");

        let error = registry.transfer("B1", "X", "Y").expect_err("held");

        assert!(matches!(
            error,
            CirculationError::InvalidState { violation: StateViolation::HeldForWaitlist, .. }
        ));
    }

    #[test]
    fn destination_already_listing_the_key_is_rejected() {
        let mut registry = two_branches();
        registry.branch_mut("Y").expect("Y").add_book(crate::test_support::book("B1")).expect("add");

        let result = registry.transfer("B1", "X", "Y");

        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::AlreadyExists));
        assert!(registry.branch("X").expect("X").contains_book("B1"));
    }

    #[rstest::rstest]
    #[case::unknown_book("B9", "X", "Y")]
    #[case::unknown_source("B1", "Z", "Y")]
    #[case::unknown_destination("B1", "X", "Z")]
    fn unknown_keys_are_not_found(#[case] isbn: &str, #[case] from: &str, #[case] to: &str) {
        let mut registry = two_branches();
        let result = registry.transfer(isbn, from, to);
        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::NotFound));
        assert!(registry.branch("X").expect("X").contains_book("B1"));
    }

    #[test]
    fn books_are_found_across_branches() {
        let registry = two_branches();
        let (branch, book) = registry.find_book_across_branches("B3").expect("listed");
        assert_eq!(branch.branch_id(), "Y");
        assert_eq!(book.isbn(), "B3");
        assert!(registry.find_book_across_branches("B9").is_none());
    }
}
