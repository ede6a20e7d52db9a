use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::BookEvent;

/// Represents the circulation status of a library book
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    /// Book is on the shelf and can be checked out
    #[default]
    Available,
    /// Book is checked out by a patron
    CheckedOut,
    /// Book is set aside for the patron at the head of its waitlist
    Reserved,
    /// Book is travelling between library branches
    InTransit,
}

impl BookStatus {
    /// Every status, in declaration order
    pub const ALL: [Self; 4] = [Self::Available, Self::CheckedOut, Self::Reserved, Self::InTransit];

    /// Look up the status reached by applying `event` to this status.
    ///
    /// Returns `None` when the lifecycle has no such transition.
    #[must_use]
    pub fn next(self, event: BookEvent) -> Option<Self> {
        match (self, event) {
            (Self::Available | Self::Reserved, BookEvent::CheckOut) => Some(Self::CheckedOut),
            (Self::CheckedOut, BookEvent::Return)
            | (Self::Reserved, BookEvent::ReleaseHold)
            | (Self::InTransit, BookEvent::Receive) => Some(Self::Available),
            (Self::Available, BookEvent::Hold) => Some(Self::Reserved),
            (Self::Available, BookEvent::Dispatch) => Some(Self::InTransit),
            _ => None,
        }
    }

    /// Get a human-readable description of the status
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Available => "Book is available for checkout",
            Self::CheckedOut => "Book is checked out by a patron",
            Self::Reserved => "Book is held for the next patron on the waitlist",
            Self::InTransit => "Book is in transit between library branches",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Available => "AVAILABLE",
            Self::CheckedOut => "CHECKED_OUT",
            Self::Reserved => "RESERVED",
            Self::InTransit => "IN_TRANSIT",
        };
        f.write_str(label)
    }
}
