//! Shared test doubles and fixtures for circulation tests.

#![allow(clippy::expect_used, clippy::arithmetic_side_effects)]

use std::sync::{
    Arc,
    mpsc::{self, Receiver},
};

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use parking_lot::Mutex;

use crate::{
    book::Book,
    branch::BranchInventory,
    observers::{ChannelNotifier, Notice},
    patron::Patron,
};

/// A clock tests can move forward by hand
#[derive(Debug)]
pub(crate) struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Start the clock at `now`
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Move the clock forward
    pub(crate) fn advance(&self, delta: TimeDelta) {
        *self.0.lock() += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Nine o'clock on the second of September 2024
pub(crate) fn opening_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).single().expect("valid instant")
}

/// A catalogued book with a generated title
pub(crate) fn book(isbn: &str) -> Book {
    Book::new(isbn, format!("Title {isbn}"), "Anonymous", 2001).expect("valid book")
}

/// A patron named after their id
pub(crate) fn patron(id: &str) -> Patron {
    Patron::new(id, format!("Patron {id}")).expect("valid patron")
}

/// A branch on a mutable clock whose notices land in a channel
pub(crate) struct BranchFixture {
    /// The branch under test
    pub(crate) branch: BranchInventory,
    /// Clock shared with the branch
    pub(crate) clock: Arc<MutableClock>,
    /// Notices the branch raised
    pub(crate) notices: Receiver<Notice>,
}

impl BranchFixture {
    /// Patron ids notified since the last call, in order
    pub(crate) fn notified(&self) -> Vec<String> {
        self.notices.try_iter().map(|notice| notice.patron_id).collect()
    }
}

/// Branch `id` listing `isbns` with patrons `patron_ids` registered
pub(crate) fn branch_fixture(id: &str, isbns: &[&str], patron_ids: &[&str]) -> BranchFixture {
    let clock = Arc::new(MutableClock::new(opening_day()));
    let (sender, notices) = mpsc::channel();
    let mut branch = BranchInventory::new(id, format!("{id} branch"), "1 Library Lane")
        .expect("valid branch")
        .with_clock(clock.clone())
        .with_notifier(Arc::new(ChannelNotifier::new(sender)));
    for isbn in isbns {
        branch.add_book(book(isbn)).expect("unique isbn");
    }
    for id in patron_ids {
        branch.add_patron(patron(id)).expect("unique patron");
    }
    BranchFixture { branch, clock, notices }
}
