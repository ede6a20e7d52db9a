use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{book::Book, patron::Patron};

/// Capability for telling a waiting patron their book is ready
///
/// Delivery is fire-and-forget: implementations must not block the return
/// that triggered the notice.
pub trait Notifier: Send + Sync {
    /// Called once for the head of a waitlist when the book is held for them
    /// at `at`, read from the branch clock
    fn notify(&self, patron: &Patron, book: &Book, at: DateTime<Utc>);
}

/// What a patron is told when a reserved book comes back
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Notice {
    /// The patron being notified
    pub patron_id: String,
    /// Their display name
    pub patron_name: String,
    /// Email on file, if any
    pub email: Option<String>,
    /// The held book
    pub isbn: String,
    /// Its title
    pub title: String,
    /// Branch holding the book
    pub branch_id: Option<String>,
    /// When the notice was raised
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    /// Build a notice for `patron` about `book`
    #[must_use]
    pub fn new(patron: &Patron, book: &Book, raised_at: DateTime<Utc>) -> Self {
        Self {
            patron_id: patron.patron_id().to_owned(),
            patron_name: patron.name().to_owned(),
            email: patron.email().map(str::to_owned),
            isbn: book.isbn().to_owned(),
            title: book.title().to_owned(),
            branch_id: book.current_branch().map(str::to_owned),
            raised_at,
        }
    }
}

/// Logs notices instead of delivering them
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, patron: &Patron, book: &Book, at: DateTime<Utc>) {
        info!(
            patron = patron.patron_id(),
            %at,
            email = patron.email().unwrap_or("-"),
            isbn = book.isbn(),
            "NOTIFICATION: {}, \"{}\" is now available for checkout",
            patron.name(),
            book.title()
        );
    }
}

/// Hands notices to a delivery worker over an unbounded channel
#[derive(Debug)]
pub struct ChannelNotifier {
    /// Sending half; the worker owns the receiver
    sender: Sender<Notice>,
}

impl ChannelNotifier {
    /// Wrap the sending half of a notice channel
    #[must_use]
    pub fn new(sender: Sender<Notice>) -> Self {
        Self { sender }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, patron: &Patron, book: &Book, at: DateTime<Utc>) {
        let notice = Notice::new(patron, book, at);
        if self.sender.send(notice).is_err() {
            warn!(patron = patron.patron_id(), isbn = book.isbn(), "notice dropped: receiver gone");
        }
    }
}
