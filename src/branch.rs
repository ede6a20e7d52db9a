use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit::{self, Anomaly},
    book::{Book, BookUpdate},
    book_status::BookStatus,
    command::{self, Compensation, Receipt},
    error::{CirculationError, Entity, StateViolation},
    events::BookEvent,
    observers::{Notifier, TracingNotifier},
    patron::{Patron, PatronUpdate},
    policy::CirculationPolicy,
    reservation::{Disposition, ExpiredHold, ReservationManager},
    transaction::Transaction,
};

/// A book the destination branch would not take, handed back to the caller
#[derive(Debug)]
pub(crate) struct Refused {
    /// Why the book was refused
    pub(crate) error: CirculationError,
    /// The refused book, still IN_TRANSIT
    pub(crate) book: Book,
}

/// Inventory, patrons, circulation log and waitlists of one library branch
pub struct BranchInventory {
    /// Branch key
    branch_id: String,
    /// Display name
    name: String,
    /// Street address
    address: String,
    /// Catalog, keyed by ISBN
    books: BTreeMap<String, Book>,
    /// Registered patrons, keyed by patron id
    patrons: BTreeMap<String, Patron>,
    /// Append-only circulation log
    ledger: Vec<Transaction>,
    /// Active waitlists, keyed by ISBN
    reservations: BTreeMap<String, ReservationManager>,
    /// Loan and hold rules
    policy: CirculationPolicy,
    /// Source of timestamps
    clock: Arc<dyn Clock + Send + Sync>,
    /// Delivers hold notices
    notifier: Arc<dyn Notifier>,
}

// Manual implementation of Debug: the clock and notifier are opaque
impl fmt::Debug for BranchInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchInventory")
            .field("branch_id", &self.branch_id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("books", &self.books)
            .field("patrons", &self.patrons)
            .field("ledger_len", &self.ledger.len())
            .field("reservations", &self.reservations)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BranchInventory {
    /// Open an empty branch with the default policy, system clock and a
    /// notifier that logs.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidField` if the branch id is blank.
    pub fn new(
        branch_id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<Self, CirculationError> {
        let branch_id = branch_id.into();
        if branch_id.trim().is_empty() {
            return Err(CirculationError::InvalidField { entity: Entity::Branch, field: "branch_id" });
        }
        let name = name.into();
        info!(branch = %branch_id, name = %name, "library branch created");
        Ok(Self {
            branch_id,
            name,
            address: address.into(),
            books: BTreeMap::new(),
            patrons: BTreeMap::new(),
            ledger: Vec::new(),
            reservations: BTreeMap::new(),
            policy: CirculationPolicy::default(),
            clock: Arc::new(DefaultClock),
            notifier: Arc::new(TracingNotifier),
        })
    }

    /// Replace the circulation policy
    #[must_use]
    pub fn with_policy(mut self, policy: CirculationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the notifier
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Branch key
    #[must_use]
    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Street address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Loan and hold rules in force
    #[must_use]
    pub fn policy(&self) -> &CirculationPolicy {
        &self.policy
    }

    /// Current time according to the branch clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    // Book management

    /// List a newly catalogued book in this branch.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a duplicate ISBN and `InvalidState` if the
    /// book is not AVAILABLE.
    pub fn add_book(&mut self, mut book: Book) -> Result<(), CirculationError> {
        if book.status() != BookStatus::Available {
            return Err(CirculationError::invalid_state(
                book.isbn(),
                book.status(),
                StateViolation::NotAvailable,
            ));
        }
        match self.books.entry(book.isbn().to_owned()) {
            Entry::Occupied(_) => {
                warn!(branch = %self.branch_id, isbn = book.isbn(), "book already listed");
                Err(CirculationError::already_exists(Entity::Book, book.isbn()))
            }
            Entry::Vacant(slot) => {
                book.set_branch(Some(&self.branch_id));
                info!(branch = %self.branch_id, isbn = book.isbn(), title = book.title(), "book added");
                slot.insert(book);
                Ok(())
            }
        }
    }

    /// Delist a book and hand it back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ISBN and `InvalidState` (`InUse`) if
    /// the book is checked out or has patrons waiting for it.
    pub fn remove_book(&mut self, isbn: &str) -> Result<Book, CirculationError> {
        let book = self.books.get(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        if book.status() == BookStatus::CheckedOut || self.reservations.contains_key(isbn) {
            return Err(CirculationError::invalid_state(isbn, book.status(), StateViolation::InUse));
        }
        let mut book =
            self.books.remove(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        book.set_branch(None);
        info!(branch = %self.branch_id, isbn, "book removed");
        Ok(book)
    }

    /// Correct a book's title or author.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ISBN.
    pub fn update_book(&mut self, isbn: &str, update: BookUpdate) -> Result<&Book, CirculationError> {
        let book = self.books.get_mut(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        book.apply_update(update);
        info!(branch = %self.branch_id, isbn, "book updated");
        Ok(book)
    }

    /// Look up a listed book
    #[must_use]
    pub fn book(&self, isbn: &str) -> Option<&Book> {
        self.books.get(isbn)
    }

    /// Whether the branch lists `isbn`
    #[must_use]
    pub fn contains_book(&self, isbn: &str) -> bool {
        self.books.contains_key(isbn)
    }

    /// Every listed book, ordered by ISBN
    #[must_use]
    pub fn books(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    /// Listed books that are on the shelf
    #[must_use]
    pub fn available_books(&self) -> impl Iterator<Item = &Book> {
        self.books.values().filter(|book| book.is_available())
    }

    // Patron management

    /// Register a patron.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a duplicate patron id.
    pub fn add_patron(&mut self, patron: Patron) -> Result<(), CirculationError> {
        match self.patrons.entry(patron.patron_id().to_owned()) {
            Entry::Occupied(_) => Err(CirculationError::already_exists(Entity::Patron, patron.patron_id())),
            Entry::Vacant(slot) => {
                info!(branch = %self.branch_id, patron = patron.patron_id(), "patron added");
                slot.insert(patron);
                Ok(())
            }
        }
    }

    /// Change a patron's contact details.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown patron id.
    pub fn update_patron(
        &mut self,
        patron_id: &str,
        update: PatronUpdate,
    ) -> Result<&Patron, CirculationError> {
        let patron = self
            .patrons
            .get_mut(patron_id)
            .ok_or_else(|| CirculationError::not_found(Entity::Patron, patron_id))?;
        patron.apply_update(update);
        info!(branch = %self.branch_id, patron = patron_id, "patron updated");
        Ok(patron)
    }

    /// Look up a registered patron
    #[must_use]
    pub fn patron(&self, patron_id: &str) -> Option<&Patron> {
        self.patrons.get(patron_id)
    }

    /// Every registered patron, ordered by id
    #[must_use]
    pub fn patrons(&self) -> impl Iterator<Item = &Patron> {
        self.patrons.values()
    }

    // Circulation

    /// Lend a book to a patron.
    ///
    /// A RESERVED book goes only to the patron it is held for, and that
    /// checkout fulfils their reservation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown book or patron, `InvalidState` if the
    /// book is not available to this patron and `LimitExceeded` if the patron
    /// is at their checkout limit.
    pub fn checkout(&mut self, isbn: &str, patron_id: &str) -> Result<Receipt, CirculationError> {
        let at = self.now();
        let book = self.books.get_mut(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        let patron = self
            .patrons
            .get_mut(patron_id)
            .ok_or_else(|| CirculationError::not_found(Entity::Patron, patron_id))?;
        if book.status() == BookStatus::Reserved
            && !self.reservations.get(isbn).is_some_and(|manager| manager.is_held_for(patron_id))
        {
            return Err(CirculationError::invalid_state(
                isbn,
                book.status(),
                StateViolation::HeldForAnotherPatron,
            ));
        }

        let receipt = command::checkout(book, patron, &mut self.ledger, at, self.policy.loan_period())?;

        let drained = match self.reservations.get_mut(isbn) {
            Some(manager) if manager.is_held_for(patron_id) => {
                drop(manager.fulfill_head());
                manager.is_empty()
            }
            _ => false,
        };
        if drained {
            self.reservations.remove(isbn);
        }
        info!(branch = %self.branch_id, isbn, patron = patron_id, "book checked out");
        Ok(receipt)
    }

    /// Take a book back from the patron holding it.
    ///
    /// If patrons are waiting, the book is held for the first of them and that
    /// patron alone is notified.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown book or patron, `InvalidState` if the
    /// book is not checked out and `WrongHolder` if this patron does not hold it.
    pub fn return_book(&mut self, isbn: &str, patron_id: &str) -> Result<Receipt, CirculationError> {
        let at = self.now();
        let book = self.books.get_mut(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        let patron = self
            .patrons
            .get_mut(patron_id)
            .ok_or_else(|| CirculationError::not_found(Entity::Patron, patron_id))?;

        let receipt = command::checkin(book, patron, &mut self.ledger, at)?;

        let released = match self.reservations.get_mut(isbn) {
            Some(manager) => {
                manager.on_book_returned(book, &self.patrons, self.notifier.as_ref(), at)?
                    == Disposition::Released
            }
            None => false,
        };
        if released {
            self.reservations.remove(isbn);
        }
        let status = book_status(&self.books, isbn);
        info!(branch = %self.branch_id, isbn, patron = patron_id, %status, "book returned");
        Ok(receipt)
    }

    /// Reverse an earlier checkout or return from this branch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the book or patron is gone, `InvalidState`
    /// (`StaleCompensation`) if later operations superseded the one being
    /// undone and `LimitExceeded` if undoing a return would breach the limit.
    pub fn compensate(&mut self, compensation: &Compensation) -> Result<(), CirculationError> {
        let at = self.now();
        let isbn = compensation.isbn();
        let patron_id = compensation.patron_id();
        let book = self.books.get_mut(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        let patron = self
            .patrons
            .get_mut(patron_id)
            .ok_or_else(|| CirculationError::not_found(Entity::Patron, patron_id))?;

        command::compensate(compensation, book, patron, &mut self.ledger, at)?;

        let released = match (compensation, self.reservations.get_mut(isbn)) {
            (Compensation::UndoCheckout { .. }, Some(manager)) => {
                manager.on_book_returned(book, &self.patrons, self.notifier.as_ref(), at)?
                    == Disposition::Released
            }
            (Compensation::UndoReturn { .. }, Some(manager)) => {
                manager.withdraw_hold();
                false
            }
            (_, None) => false,
        };
        if released {
            self.reservations.remove(isbn);
        }
        Ok(())
    }

    // Reservations

    /// Join the waitlist for a book that is not on the shelf.
    ///
    /// Returns `false` if the patron was already waiting.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown book or patron and
    /// `ReservationNotNeeded` if the book is available.
    pub fn reserve(&mut self, isbn: &str, patron_id: &str) -> Result<bool, CirculationError> {
        let book = self.books.get(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        if !self.patrons.contains_key(patron_id) {
            return Err(CirculationError::not_found(Entity::Patron, patron_id));
        }
        if book.is_available() {
            return Err(CirculationError::ReservationNotNeeded { isbn: isbn.to_owned() });
        }
        let manager =
            self.reservations.entry(isbn.to_owned()).or_insert_with(|| ReservationManager::new(isbn));
        let queued = manager.reserve(book, patron_id)?;
        if queued {
            info!(branch = %self.branch_id, isbn, patron = patron_id, "book reserved");
        }
        Ok(queued)
    }

    /// Leave the waitlist for a book.
    ///
    /// If the book was held for this patron, the hold passes to the next one
    /// or the book goes back on the shelf.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchReservation` if the title has no waitlist or the patron is
    /// not on it, and `NotFound` for an unknown patron.
    pub fn cancel_reservation(&mut self, isbn: &str, patron_id: &str) -> Result<(), CirculationError> {
        let at = self.now();
        let manager = self.reservations.get_mut(isbn).ok_or_else(|| CirculationError::NoSuchReservation {
            isbn: isbn.to_owned(),
            patron_id: patron_id.to_owned(),
        })?;
        if !self.patrons.contains_key(patron_id) {
            return Err(CirculationError::not_found(Entity::Patron, patron_id));
        }

        let was_held = manager.cancel(patron_id)?;
        let released = match self.books.get_mut(isbn) {
            Some(book) if was_held => {
                manager.pass_hold(book, &self.patrons, self.notifier.as_ref(), at)? == Disposition::Released
            }
            _ => manager.is_empty(),
        };
        if released {
            self.reservations.remove(isbn);
        }
        info!(branch = %self.branch_id, isbn, patron = patron_id, "reservation cancelled");
        Ok(())
    }

    /// Explicitly dequeue the head of a waitlist once they have acted.
    ///
    /// If the book was held for that patron, the hold passes to the next one
    /// or the book goes back on the shelf.
    ///
    /// # Errors
    ///
    /// Returns `NoWaitlist` if the title has no waitlist.
    pub fn fulfill_reservation(&mut self, isbn: &str) -> Result<Option<String>, CirculationError> {
        let at = self.now();
        let manager = self
            .reservations
            .get_mut(isbn)
            .ok_or_else(|| CirculationError::NoWaitlist { isbn: isbn.to_owned() })?;
        let fulfilled = manager.fulfill_head();
        let released = match self.books.get_mut(isbn) {
            Some(book) if book.status() == BookStatus::Reserved && manager.hold().is_none() => {
                manager.pass_hold(book, &self.patrons, self.notifier.as_ref(), at)? == Disposition::Released
            }
            _ => manager.is_empty(),
        };
        if released {
            self.reservations.remove(isbn);
        }
        Ok(fulfilled)
    }

    /// Number of patrons waiting for `isbn`; zero when it has no waitlist
    #[must_use]
    pub fn waitlist_size(&self, isbn: &str) -> usize {
        self.reservations.get(isbn).map_or(0, ReservationManager::len)
    }

    /// The active waitlist for `isbn`
    #[must_use]
    pub fn waitlist(&self, isbn: &str) -> Option<&ReservationManager> {
        self.reservations.get(isbn)
    }

    /// Every active waitlist, ordered by ISBN
    #[must_use]
    pub fn waitlists(&self) -> impl Iterator<Item = &ReservationManager> {
        self.reservations.values()
    }

    /// Drop holds whose patron did not collect within the policy's hold
    /// period and pass each book on.
    ///
    /// Does nothing when the policy keeps holds forever.
    pub fn expire_holds(&mut self) -> Vec<ExpiredHold> {
        let Some(period) = self.policy.hold_period() else {
            return Vec::new();
        };
        let now = self.now();
        let stale: Vec<String> = self
            .reservations
            .values()
            .filter(|manager| manager.hold_expired(now, period))
            .map(|manager| manager.isbn().to_owned())
            .collect();

        let mut expired = Vec::new();
        for isbn in stale {
            let (Some(manager), Some(book)) = (self.reservations.get_mut(&isbn), self.books.get_mut(&isbn))
            else {
                continue;
            };
            let Some(hold) = manager.expire_head() else {
                continue;
            };
            let released = match manager.pass_hold(book, &self.patrons, self.notifier.as_ref(), now) {
                Ok(disposition) => disposition == Disposition::Released,
                Err(error) => {
                    warn!(branch = %self.branch_id, isbn = %isbn, %error, "could not pass expired hold");
                    false
                }
            };
            if released {
                self.reservations.remove(&isbn);
            }
            expired.push(ExpiredHold { isbn, hold });
        }
        expired
    }

    // Transaction log

    /// The circulation log, oldest first
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.ledger
    }

    /// Look up one transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub fn transaction(&self, id: Uuid) -> Result<&Transaction, CirculationError> {
        self.ledger
            .iter()
            .find(|tx| tx.id() == id)
            .ok_or_else(|| CirculationError::not_found(Entity::Transaction, &id.to_string()))
    }

    /// Checkouts past their due date and not yet returned
    #[must_use]
    pub fn overdue_transactions(&self) -> Vec<&Transaction> {
        let now = self.now();
        self.ledger.iter().filter(|tx| tx.is_overdue(now)).collect()
    }

    /// Check this branch's invariants
    #[must_use]
    pub fn audit(&self) -> Vec<Anomaly> {
        audit::audit_branch(self)
    }

    // Transfer plumbing

    /// Check that `isbn` may leave this branch
    pub(crate) fn check_departure(&self, isbn: &str) -> Result<(), CirculationError> {
        let book = self.books.get(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        match book.status() {
            BookStatus::CheckedOut => Err(CirculationError::invalid_state(
                isbn,
                book.status(),
                StateViolation::CheckedOutInTransfer,
            )),
            BookStatus::Reserved => {
                Err(CirculationError::invalid_state(isbn, book.status(), StateViolation::HeldForWaitlist))
            }
            BookStatus::Available | BookStatus::InTransit => Ok(()),
        }
    }

    /// Check that this branch could list `isbn`
    pub(crate) fn check_arrival(&self, isbn: &str) -> Result<(), CirculationError> {
        if self.books.contains_key(isbn) {
            return Err(CirculationError::already_exists(Entity::Book, isbn));
        }
        Ok(())
    }

    /// Delist a book and send it towards `destination`, now IN_TRANSIT
    pub(crate) fn dispatch(&mut self, isbn: &str, destination: &str) -> Result<Book, CirculationError> {
        self.check_departure(isbn)?;
        let mut book =
            self.books.remove(isbn).ok_or_else(|| CirculationError::not_found(Entity::Book, isbn))?;
        if let Err(error) = book.apply(BookEvent::Dispatch, StateViolation::NotAvailable) {
            self.books.insert(isbn.to_owned(), book);
            return Err(error);
        }
        book.set_branch(Some(destination));
        info!(branch = %self.branch_id, isbn, destination, "book dispatched");
        Ok(book)
    }

    /// List a book arriving from another branch, then shelve it
    pub(crate) fn receive(&mut self, mut book: Book) -> Result<(), Refused> {
        if book.status() != BookStatus::InTransit {
            let error =
                CirculationError::invalid_state(book.isbn(), book.status(), StateViolation::NotAvailable);
            return Err(Refused { error, book });
        }
        match self.books.entry(book.isbn().to_owned()) {
            Entry::Occupied(_) => {
                let error = CirculationError::already_exists(Entity::Book, book.isbn());
                Err(Refused { error, book })
            }
            Entry::Vacant(slot) => {
                book.set_branch(Some(&self.branch_id));
                let listed = slot.insert(book);
                if let Err(error) = listed.apply(BookEvent::Receive, StateViolation::NotAvailable) {
                    warn!(isbn = listed.isbn(), %error, "received book not shelved");
                }
                info!(branch = %self.branch_id, isbn = listed.isbn(), "book received");
                Ok(())
            }
        }
    }

    /// Put back a dispatched book the destination refused
    pub(crate) fn restore(&mut self, mut book: Book) {
        book.set_branch(Some(&self.branch_id));
        book.restore_status(BookStatus::Available);
        warn!(branch = %self.branch_id, isbn = book.isbn(), "dispatched book restored");
        self.books.insert(book.isbn().to_owned(), book);
    }
}

/// Status of a listed book for log lines
fn book_status(books: &BTreeMap<String, Book>, isbn: &str) -> String {
    books.get(isbn).map_or_else(|| "-".to_owned(), |book| book.status().to_string())
}

#[cfg(test)]
mod tests;
