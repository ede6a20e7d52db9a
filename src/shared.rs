//! Thread-safe registry for serving several callers at once.
//!
//! The branch map sits behind a read-write lock and every branch behind its
//! own mutex. All operations on one branch are serialized by that mutex. A
//! transfer holds both branch mutexes for its whole run, taken in ascending
//! branch-id order, so opposite transfers cannot deadlock. Every acquisition
//! gives up after the configured timeout.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::{
    audit::{self, Anomaly},
    branch::BranchInventory,
    command::Receipt,
    error::{CirculationError, Entity},
    policy::CirculationPolicy,
    registry::{self, TransferRecord},
    snapshot::RegistrySnapshot,
};

/// A branch behind its own lock
type SharedBranch = Arc<Mutex<BranchInventory>>;

/// Registry safe to share between threads
#[derive(Debug)]
pub struct SharedRegistry {
    /// Branches keyed by id
    branches: RwLock<BTreeMap<String, SharedBranch>>,
    /// Transfer attempts, oldest first
    journal: Mutex<Vec<TransferRecord>>,
    /// How long any lock acquisition may wait
    lock_timeout: Duration,
}

impl SharedRegistry {
    /// An empty registry whose locks wait at most `lock_timeout`
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self { branches: RwLock::new(BTreeMap::new()), journal: Mutex::new(Vec::new()), lock_timeout }
    }

    /// An empty registry using the policy's lock timeout
    #[must_use]
    pub fn from_policy(policy: &CirculationPolicy) -> Self {
        Self::new(policy.lock_timeout())
    }

    /// Register a branch.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a duplicate id and `LockTimeout` if the
    /// branch map stays busy.
    pub fn add_branch(&self, branch: BranchInventory) -> Result<(), CirculationError> {
        let branch_id = branch.branch_id().to_owned();
        let mut branches =
            self.branches.try_write_for(self.lock_timeout).ok_or_else(|| self.timeout(&branch_id))?;
        if branches.contains_key(&branch_id) {
            return Err(CirculationError::already_exists(Entity::Branch, &branch_id));
        }
        info!(branch = %branch_id, "branch registered");
        branches.insert(branch_id, Arc::new(Mutex::new(branch)));
        Ok(())
    }

    /// Ids of every registered branch, ascending.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the branch map stays busy.
    pub fn branch_ids(&self) -> Result<Vec<String>, CirculationError> {
        let branches = self.branches.try_read_for(self.lock_timeout).ok_or_else(|| self.timeout("*"))?;
        Ok(branches.keys().cloned().collect())
    }

    /// Run `operation` with exclusive access to one branch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown branch and `LockTimeout` if the
    /// branch stays locked.
    pub fn with_branch<R>(
        &self,
        branch_id: &str,
        operation: impl FnOnce(&mut BranchInventory) -> R,
    ) -> Result<R, CirculationError> {
        let branch = self.shared_branch(branch_id)?;
        let mut guard = self.lock_branch(branch_id, &branch)?;
        Ok(operation(&mut guard))
    }

    /// Check out a book at one branch.
    ///
    /// # Errors
    ///
    /// As [`BranchInventory::checkout`], plus `NotFound` for an unknown branch
    /// and `LockTimeout`.
    pub fn checkout(
        &self,
        branch_id: &str,
        isbn: &str,
        patron_id: &str,
    ) -> Result<Receipt, CirculationError> {
        self.with_branch(branch_id, |branch| branch.checkout(isbn, patron_id))?
    }

    /// Return a book at one branch.
    ///
    /// # Errors
    ///
    /// As [`BranchInventory::return_book`], plus `NotFound` for an unknown
    /// branch and `LockTimeout`.
    pub fn return_book(
        &self,
        branch_id: &str,
        isbn: &str,
        patron_id: &str,
    ) -> Result<Receipt, CirculationError> {
        self.with_branch(branch_id, |branch| branch.return_book(isbn, patron_id))?
    }

    /// Reserve a book at one branch.
    ///
    /// # Errors
    ///
    /// As [`BranchInventory::reserve`], plus `NotFound` for an unknown branch
    /// and `LockTimeout`.
    pub fn reserve(&self, branch_id: &str, isbn: &str, patron_id: &str) -> Result<bool, CirculationError> {
        self.with_branch(branch_id, |branch| branch.reserve(isbn, patron_id))?
    }

    /// Cancel a reservation at one branch.
    ///
    /// # Errors
    ///
    /// As [`BranchInventory::cancel_reservation`], plus `NotFound` for an
    /// unknown branch and `LockTimeout`.
    pub fn cancel_reservation(
        &self,
        branch_id: &str,
        isbn: &str,
        patron_id: &str,
    ) -> Result<(), CirculationError> {
        self.with_branch(branch_id, |branch| branch.cancel_reservation(isbn, patron_id))?
    }

    /// Move a book between branches while holding both branch locks.
    ///
    /// # Errors
    ///
    /// As [`crate::SystemRegistry::transfer`], plus `LockTimeout` if either
    /// branch or the journal stays locked.
    pub fn transfer(&self, isbn: &str, from: &str, to: &str) -> Result<TransferRecord, CirculationError> {
        let source = self.shared_branch(from)?;
        let destination = self.shared_branch(to)?;
        if from == to {
            let branch = self.lock_branch(from, &source)?;
            branch.check_departure(isbn)?;
            return Err(CirculationError::already_exists(Entity::Book, isbn));
        }

        let (mut source_guard, mut destination_guard) = if from < to {
            let source_guard = self.lock_branch(from, &source)?;
            (source_guard, self.lock_branch(to, &destination)?)
        } else {
            let destination_guard = self.lock_branch(to, &destination)?;
            (self.lock_branch(from, &source)?, destination_guard)
        };
        let mut journal = self.journal.try_lock_for(self.lock_timeout).ok_or_else(|| self.timeout(from))?;
        debug!(isbn, from, to, "both branches locked for transfer");
        registry::move_book(&mut source_guard, &mut destination_guard, isbn, &mut journal)
    }

    /// Transfer attempts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the journal stays locked.
    pub fn transfers(&self) -> Result<Vec<TransferRecord>, CirculationError> {
        let journal = self.journal.try_lock_for(self.lock_timeout).ok_or_else(|| self.timeout("*"))?;
        Ok(journal.clone())
    }

    /// Check every branch and the transfer journal.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if any branch stays locked.
    pub fn audit(&self) -> Result<Vec<Anomaly>, CirculationError> {
        self.with_all_branches(audit::audit_registry)
    }

    /// Export the whole registry for inspection.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if any branch stays locked.
    pub fn snapshot(&self) -> Result<RegistrySnapshot, CirculationError> {
        self.with_all_branches(RegistrySnapshot::capture)
    }

    /// Lock every branch in ascending id order, then the journal
    fn with_all_branches<R>(
        &self,
        operation: impl FnOnce(&[&BranchInventory], &[TransferRecord]) -> R,
    ) -> Result<R, CirculationError> {
        let shared: Vec<(String, SharedBranch)> = {
            let branches = self.branches.try_read_for(self.lock_timeout).ok_or_else(|| self.timeout("*"))?;
            branches.iter().map(|(id, branch)| (id.clone(), Arc::clone(branch))).collect()
        };
        let guards = shared
            .iter()
            .map(|(id, branch)| self.lock_branch(id, branch))
            .collect::<Result<Vec<_>, _>>()?;
        let views: Vec<&BranchInventory> = guards.iter().map(|guard| &**guard).collect();
        let journal = self.journal.try_lock_for(self.lock_timeout).ok_or_else(|| self.timeout("*"))?;
        Ok(operation(&views, &journal))
    }

    /// Clone the handle of one branch, releasing the map lock straight away
    fn shared_branch(&self, branch_id: &str) -> Result<SharedBranch, CirculationError> {
        let branches = self.branches.try_read_for(self.lock_timeout).ok_or_else(|| self.timeout(branch_id))?;
        branches
            .get(branch_id)
            .map(Arc::clone)
            .ok_or_else(|| CirculationError::not_found(Entity::Branch, branch_id))
    }

    /// Lock one branch within the timeout
    fn lock_branch<'a>(
        &self,
        branch_id: &str,
        branch: &'a Mutex<BranchInventory>,
    ) -> Result<MutexGuard<'a, BranchInventory>, CirculationError> {
        branch.try_lock_for(self.lock_timeout).ok_or_else(|| self.timeout(branch_id))
    }

    /// Build a timeout error and log it
    fn timeout(&self, branch_id: &str) -> CirculationError {
        warn!(branch = branch_id, waited = ?self.lock_timeout, "lock acquisition timed out");
        CirculationError::LockTimeout { branch_id: branch_id.to_owned(), waited: self.lock_timeout }
    }
}
