use std::fmt;

use serde::{Deserialize, Serialize};

/// Events that drive a book through its circulation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum BookEvent {
    /// A patron borrows the book
    CheckOut,
    /// The borrowing patron brings the book back
    Return,
    /// A returned book is set aside for the head of its waitlist
    Hold,
    /// A held book goes back on the shelf because nobody is waiting any more
    ReleaseHold,
    /// The book leaves its branch for another one
    Dispatch,
    /// The book is received by its destination branch
    Receive,
}

impl BookEvent {
    /// Every event, in declaration order
    pub const ALL: [Self; 6] = [
        Self::CheckOut,
        Self::Return,
        Self::Hold,
        Self::ReleaseHold,
        Self::Dispatch,
        Self::Receive,
    ];
}

impl fmt::Display for BookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CheckOut => "check out",
            Self::Return => "return",
            Self::Hold => "hold",
            Self::ReleaseHold => "release hold",
            Self::Dispatch => "dispatch",
            Self::Receive => "receive",
        };
        f.write_str(label)
    }
}
