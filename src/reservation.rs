use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    book::Book,
    book_status::BookStatus,
    error::{CirculationError, StateViolation},
    events::BookEvent,
    observers::Notifier,
    patron::Patron,
};

/// The hold placed for the notified head of a waitlist
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hold {
    /// Patron the book is held for
    pub patron_id: String,
    /// When they were notified
    pub notified_at: DateTime<Utc>,
}

/// A hold dropped because the notified patron did not collect in time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExpiredHold {
    /// The held book
    pub isbn: String,
    /// The hold that lapsed
    pub hold: Hold,
}

/// Where a book ended up after its waitlist was consulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The book is RESERVED for this patron, who has been notified
    Held(String),
    /// Nobody is waiting; the book is AVAILABLE and the manager can go
    Released,
}

/// FIFO waitlist for one title at one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationManager {
    /// The title being waited for
    isbn: String,
    /// Waiting patrons, head first, no duplicates
    waitlist: VecDeque<String>,
    /// Outstanding notification for the head, if any
    hold: Option<Hold>,
}

impl ReservationManager {
    /// An empty waitlist for `isbn`
    #[must_use]
    pub fn new(isbn: impl Into<String>) -> Self {
        Self { isbn: isbn.into(), waitlist: VecDeque::new(), hold: None }
    }

    /// The title being waited for
    #[must_use]
    pub fn isbn(&self) -> &str {
        &self.isbn
    }

    /// Number of waiting patrons
    #[must_use]
    pub fn len(&self) -> usize {
        self.waitlist.len()
    }

    /// Whether nobody is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waitlist.is_empty()
    }

    /// Patron at the head of the queue
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        self.waitlist.front().map(String::as_str)
    }

    /// Zero-based queue position of `patron_id`
    #[must_use]
    pub fn position(&self, patron_id: &str) -> Option<usize> {
        self.waitlist.iter().position(|id| id == patron_id)
    }

    /// Waiting patrons, head first
    #[must_use]
    pub fn patrons(&self) -> impl Iterator<Item = &str> {
        self.waitlist.iter().map(String::as_str)
    }

    /// Outstanding hold notification
    #[must_use]
    pub fn hold(&self) -> Option<&Hold> {
        self.hold.as_ref()
    }

    /// Whether the book is currently held for `patron_id`
    #[must_use]
    pub fn is_held_for(&self, patron_id: &str) -> bool {
        self.hold.as_ref().is_some_and(|hold| hold.patron_id == patron_id)
    }

    /// Whether the outstanding hold was raised more than `period` before `now`
    #[must_use]
    pub fn hold_expired(&self, now: DateTime<Utc>, period: TimeDelta) -> bool {
        self.hold.as_ref().is_some_and(|hold| {
            hold.notified_at.checked_add_signed(period).is_some_and(|deadline| deadline <= now)
        })
    }

    /// Queue `patron_id` behind everyone already waiting.
    ///
    /// Returns `false` when the patron was already queued.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::ReservationNotNeeded` if the book is available.
    pub fn reserve(&mut self, book: &Book, patron_id: &str) -> Result<bool, CirculationError> {
        if book.is_available() {
            return Err(CirculationError::ReservationNotNeeded { isbn: book.isbn().to_owned() });
        }
        if self.position(patron_id).is_some() {
            return Ok(false);
        }
        self.waitlist.push_back(patron_id.to_owned());
        info!(isbn = %self.isbn, patron = patron_id, size = self.waitlist.len(), "patron added to waitlist");
        Ok(true)
    }

    /// Remove `patron_id` wherever it sits in the queue.
    ///
    /// Returns `true` when the removed patron had the book held for them; the
    /// caller then passes the hold on.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::NoSuchReservation` if the patron is not queued.
    pub fn cancel(&mut self, patron_id: &str) -> Result<bool, CirculationError> {
        let position = self.position(patron_id).ok_or_else(|| CirculationError::NoSuchReservation {
            isbn: self.isbn.clone(),
            patron_id: patron_id.to_owned(),
        })?;
        drop(self.waitlist.remove(position));
        let was_held = self.is_held_for(patron_id);
        if was_held {
            self.hold = None;
        }
        info!(isbn = %self.isbn, patron = patron_id, "patron removed from waitlist");
        Ok(was_held)
    }

    /// Decide the status of a book that has just been returned.
    ///
    /// Holds it for the head of the queue and notifies exactly that patron, or
    /// leaves it AVAILABLE when nobody is waiting.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidState` if the book is not AVAILABLE.
    pub fn on_book_returned(
        &mut self,
        book: &mut Book,
        patrons: &BTreeMap<String, Patron>,
        notifier: &dyn Notifier,
        at: DateTime<Utc>,
    ) -> Result<Disposition, CirculationError> {
        if book.status() != BookStatus::Available {
            return Err(CirculationError::invalid_state(
                book.isbn(),
                book.status(),
                StateViolation::NotAvailable,
            ));
        }
        if self.waitlist.is_empty() {
            return Ok(Disposition::Released);
        }
        book.apply(BookEvent::Hold, StateViolation::NotAvailable)?;
        Ok(self.notify_head(book, patrons, notifier, at))
    }

    /// Give a RESERVED book to the next patron after the holder left the queue.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidState` if the book is not RESERVED.
    pub fn pass_hold(
        &mut self,
        book: &mut Book,
        patrons: &BTreeMap<String, Patron>,
        notifier: &dyn Notifier,
        at: DateTime<Utc>,
    ) -> Result<Disposition, CirculationError> {
        if book.status() != BookStatus::Reserved {
            return Err(CirculationError::invalid_state(
                book.isbn(),
                book.status(),
                StateViolation::NotAvailable,
            ));
        }
        self.hold = None;
        if self.waitlist.is_empty() {
            book.apply(BookEvent::ReleaseHold, StateViolation::NotAvailable)?;
            return Ok(Disposition::Released);
        }
        Ok(self.notify_head(book, patrons, notifier, at))
    }

    /// Drop the head once the notified patron has acted on the notice.
    pub fn fulfill_head(&mut self) -> Option<String> {
        let fulfilled = self.waitlist.pop_front();
        if let Some(patron_id) = &fulfilled {
            if self.is_held_for(patron_id) {
                self.hold = None;
            }
            info!(isbn = %self.isbn, patron = %patron_id, "reservation fulfilled");
        }
        fulfilled
    }

    /// Drop the head whose hold ran out, returning the lapsed hold
    pub fn expire_head(&mut self) -> Option<Hold> {
        let hold = self.hold.take()?;
        if self.head() == Some(hold.patron_id.as_str()) {
            drop(self.waitlist.pop_front());
        }
        warn!(isbn = %self.isbn, patron = %hold.patron_id, "hold expired uncollected");
        Some(hold)
    }

    /// Forget an outstanding notification; the patron keeps their place
    pub(crate) fn withdraw_hold(&mut self) {
        self.hold = None;
    }

    /// Notify the head of the queue and record the hold
    fn notify_head(
        &mut self,
        book: &Book,
        patrons: &BTreeMap<String, Patron>,
        notifier: &dyn Notifier,
        at: DateTime<Utc>,
    ) -> Disposition {
        let Some(head) = self.waitlist.front().cloned() else {
            return Disposition::Released;
        };
        match patrons.get(&head) {
            Some(patron) => notifier.notify(patron, book, at),
            None => warn!(isbn = %self.isbn, patron = %head, "waitlist head is not a registered patron"),
        }
        self.hold = Some(Hold { patron_id: head.clone(), notified_at: at });
        Disposition::Held(head)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::mpsc::{self, Receiver};

    use chrono::TimeZone;

    use super::*;
    use crate::observers::{ChannelNotifier, Notice};

    /// Fixed instant for waitlist tests
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).single().unwrap_or_default()
    }

    /// A checked-out book, three patrons and a notifier feeding a channel
    fn setup() -> (Book, BTreeMap<String, Patron>, ChannelNotifier, Receiver<Notice>) {
        let mut book = Book::new("B1", "Dune", "Frank Herbert", 1965).expect("valid book");
        book.apply(BookEvent::CheckOut, StateViolation::NotAvailable).expect("checkout edge");
        let patrons = ["A", "B", "C"]
            .into_iter()
            .map(|id| (id.to_owned(), Patron::new(id, format!("Patron {id}")).expect("valid patron")))
            .collect();
        let (tx, rx) = mpsc::channel();
        (book, patrons, ChannelNotifier::new(tx), rx)
    }

    /// Notified patron ids, in order
    fn notified(rx: &Receiver<Notice>) -> Vec<String> {
        rx.try_iter().map(|notice| notice.patron_id).collect()
    }

    #[test]
    fn reserving_an_available_book_is_rejected() {
        let book = Book::new("B1", "Dune", "Frank Herbert", 1965).expect("valid book");
        let mut manager = ReservationManager::new("B1");
        assert!(matches!(
            manager.reserve(&book, "A"),
            Err(CirculationError::ReservationNotNeeded { .. })
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn reserve_is_idempotent_per_patron() {
        let (book, _, _, _) = setup();
        let mut manager = ReservationManager::new("B1");
        assert_eq!(manager.reserve(&book, "A"), Ok(true));
        assert_eq!(manager.reserve(&book, "A"), Ok(false));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn return_notifies_only_the_head() {
        let (mut book, patrons, notifier, rx) = setup();
        let mut manager = ReservationManager::new("B1");
        manager.reserve(&book, "A").expect("reserve A");
        manager.reserve(&book, "B").expect("reserve B");
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");

        let disposition = manager.on_book_returned(&mut book, &patrons, &notifier, now());

        assert_eq!(disposition, Ok(Disposition::Held("A".to_owned())));
        assert_eq!(book.status(), BookStatus::Reserved);
        assert_eq!(notified(&rx), vec!["A".to_owned()]);
        assert_eq!(manager.len(), 2);
        assert!(manager.is_held_for("A"));
    }

    #[test]
    fn cancelled_head_is_skipped_on_return() {
        let (mut book, patrons, notifier, rx) = setup();
        let mut manager = ReservationManager::new("B1");
        manager.reserve(&book, "A").expect("reserve A");
        manager.reserve(&book, "B").expect("reserve B");
        assert_eq!(manager.cancel("A"), Ok(false));
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");

        let disposition = manager.on_book_returned(&mut book, &patrons, &notifier, now());

        assert_eq!(disposition, Ok(Disposition::Held("B".to_owned())));
        assert_eq!(notified(&rx), vec!["B".to_owned()]);
    }

    #[test]
    fn cancel_from_the_middle_keeps_order() {
        let (book, _, _, _) = setup();
        let mut manager = ReservationManager::new("B1");
        for id in ["A", "B", "C"] {
            manager.reserve(&book, id).expect("reserve");
        }
        assert_eq!(manager.cancel("B"), Ok(false));
        assert_eq!(manager.patrons().collect::<Vec<_>>(), vec!["A", "C"]);
        assert!(matches!(manager.cancel("B"), Err(CirculationError::NoSuchReservation { .. })));
    }

    #[test]
    fn empty_waitlist_releases_the_book() {
        let (mut book, patrons, notifier, rx) = setup();
        let mut manager = ReservationManager::new("B1");
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");

        let disposition = manager.on_book_returned(&mut book, &patrons, &notifier, now());

        assert_eq!(disposition, Ok(Disposition::Released));
        assert_eq!(book.status(), BookStatus::Available);
        assert!(notified(&rx).is_empty());
    }

    #[test]
    fn passing_the_hold_notifies_the_next_patron() {
        let (mut book, patrons, notifier, rx) = setup();
        let mut manager = ReservationManager::new("B1");
        manager.reserve(&book, "A").expect("reserve A");
        manager.reserve(&book, "B").expect("reserve B");
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");
        drop(manager.on_book_returned(&mut book, &patrons, &notifier, now()));

        assert_eq!(manager.cancel("A"), Ok(true));
        let disposition = manager.pass_hold(&mut book, &patrons, &notifier, now());

        assert_eq!(disposition, Ok(Disposition::Held("B".to_owned())));
        assert_eq!(notified(&rx), vec!["A".to_owned(), "B".to_owned()]);
        assert_eq!(book.status(), BookStatus::Reserved);
    }

    #[test]
    fn fulfill_pops_the_head_and_clears_the_hold() {
        let (mut book, patrons, notifier, _rx) = setup();
        let mut manager = ReservationManager::new("B1");
        manager.reserve(&book, "A").expect("reserve A");
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");
        drop(manager.on_book_returned(&mut book, &patrons, &notifier, now()));

        assert_eq!(manager.fulfill_head(), Some("A".to_owned()));
        assert!(manager.is_empty());
        assert!(manager.hold().is_none());
    }

    #[test]
    fn hold_expires_after_period() {
        let (mut book, patrons, notifier, _rx) = setup();
        let mut manager = ReservationManager::new("B1");
        manager.reserve(&book, "A").expect("reserve A");
        book.apply(BookEvent::Return, StateViolation::NotCheckedOut).expect("return edge");
        drop(manager.on_book_returned(&mut book, &patrons, &notifier, now()));

        let period = TimeDelta::hours(48);
        assert!(!manager.hold_expired(now() + TimeDelta::hours(47), period));
        assert!(manager.hold_expired(now() + TimeDelta::hours(48), period));

        let lapsed = manager.expire_head();
        assert!(lapsed.is_some_and(|hold| hold.patron_id == "A"));
        assert!(manager.is_empty());
    }
}
