//! Circulation engine for a multi-branch library.
//!
//! Books move through a small lifecycle (available, checked out, reserved,
//! in transit) driven by checkout, return, waitlist holds and transfers
//! between branches. Every mutation validates before it applies, so a failed
//! call leaves the branch as it was.
//!
//! [`SystemRegistry`] is the single-threaded entry point; [`SharedRegistry`]
//! wraps the same operations in per-branch locks for concurrent callers.

pub mod audit;
pub mod book;
pub mod book_status;
pub mod branch;
pub mod command;
pub mod error;
pub mod events;
pub mod observers;
pub mod patron;
pub mod policy;
pub mod registry;
pub mod reservation;
pub mod shared;
pub mod snapshot;
pub mod transaction;
pub mod visualization;

#[cfg(test)]
mod test_support;

pub use audit::Anomaly;
pub use book::{Book, BookUpdate};
pub use book_status::BookStatus;
pub use branch::BranchInventory;
pub use command::{Compensation, Receipt};
pub use error::{CirculationError, ErrorKind, StateViolation};
pub use events::BookEvent;
pub use observers::{ChannelNotifier, Notice, Notifier, TracingNotifier};
pub use patron::{BorrowingRecord, Patron, PatronUpdate};
pub use policy::{CirculationPolicy, PolicyError};
pub use registry::{SystemRegistry, TransferPhase, TransferRecord};
pub use reservation::{ExpiredHold, Hold, ReservationManager};
pub use shared::SharedRegistry;
pub use snapshot::RegistrySnapshot;
pub use transaction::{Transaction, TransactionKind};
