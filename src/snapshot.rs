//! Read-only JSON export of registry state.
//!
//! Snapshots serialize only; there is no way to load one back into a
//! registry.

use serde::Serialize;

use crate::{
    book::Book,
    branch::BranchInventory,
    patron::Patron,
    policy::CirculationPolicy,
    registry::TransferRecord,
    reservation::{Hold, ReservationManager},
    transaction::Transaction,
};

/// One waitlist as it stood when the snapshot was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitlistSnapshot {
    /// The title waited for
    pub isbn: String,
    /// Waiting patrons, head first
    pub patron_ids: Vec<String>,
    /// Outstanding hold for the head
    pub hold: Option<Hold>,
}

impl From<&ReservationManager> for WaitlistSnapshot {
    fn from(manager: &ReservationManager) -> Self {
        Self {
            isbn: manager.isbn().to_owned(),
            patron_ids: manager.patrons().map(str::to_owned).collect(),
            hold: manager.hold().cloned(),
        }
    }
}

/// Everything one branch holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSnapshot {
    /// Branch key
    pub branch_id: String,
    /// Display name
    pub name: String,
    /// Street address
    pub address: String,
    /// Rules in force
    pub policy: CirculationPolicy,
    /// Listed books, ordered by ISBN
    pub books: Vec<Book>,
    /// Registered patrons, ordered by id
    pub patrons: Vec<Patron>,
    /// Circulation log, oldest first
    pub transactions: Vec<Transaction>,
    /// Active waitlists, ordered by ISBN
    pub waitlists: Vec<WaitlistSnapshot>,
}

impl From<&BranchInventory> for BranchSnapshot {
    fn from(branch: &BranchInventory) -> Self {
        Self {
            branch_id: branch.branch_id().to_owned(),
            name: branch.name().to_owned(),
            address: branch.address().to_owned(),
            policy: branch.policy().clone(),
            books: branch.books().cloned().collect(),
            patrons: branch.patrons().cloned().collect(),
            transactions: branch.transactions().to_vec(),
            waitlists: branch.waitlists().map(WaitlistSnapshot::from).collect(),
        }
    }
}

/// Every branch and the transfer journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Branches, ordered by id
    pub branches: Vec<BranchSnapshot>,
    /// Transfer attempts, oldest first
    pub transfers: Vec<TransferRecord>,
}

impl RegistrySnapshot {
    /// Copy the state of `branches` and `journal`
    pub(crate) fn capture(branches: &[&BranchInventory], journal: &[TransferRecord]) -> Self {
        Self {
            branches: branches.iter().copied().map(BranchSnapshot::from).collect(),
            transfers: journal.to_vec(),
        }
    }

    /// Render as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only arises for non-string map keys.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
