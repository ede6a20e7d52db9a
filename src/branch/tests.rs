#![allow(clippy::expect_used, clippy::arithmetic_side_effects)]

use chrono::TimeDelta;
use rstest::rstest;

use super::*;
use crate::{
    error::ErrorKind,
    patron::{BorrowingRecord, DEFAULT_CHECKOUT_LIMIT},
    test_support::{BranchFixture, book, branch_fixture, opening_day, patron},
    transaction::TransactionKind,
};

/// Branch "X" with book B1 and patrons P1, P2 and P3
fn circulating() -> BranchFixture {
    branch_fixture("X", &["B1"], &["P1", "P2", "P3"])
}

#[test]
fn duplicate_keys_are_rejected() {
    let BranchFixture { mut branch, .. } = circulating();

    let book_error = branch.add_book(book("B1")).expect_err("duplicate isbn");
    let patron_error = branch.add_patron(patron("P1")).expect_err("duplicate patron");

    assert_eq!(book_error.kind(), ErrorKind::AlreadyExists);
    assert_eq!(patron_error.kind(), ErrorKind::AlreadyExists);
    assert_eq!(branch.books().count(), 1);
}

#[test]
fn added_books_belong_to_the_branch() {
    let BranchFixture { branch, .. } = circulating();
    let listed = branch.book("B1").expect("listed");
    assert_eq!(listed.current_branch(), Some("X"));
    assert_eq!(branch.available_books().count(), 1);
}

#[test]
fn checked_out_books_cannot_be_removed() {
    let BranchFixture { mut branch, .. } = circulating();
    branch.checkout("B1", "P1").expect("checkout");

    let error = branch.remove_book("B1").expect_err("in use");

    assert!(matches!(error, CirculationError::InvalidState { violation: StateViolation::InUse, .. }));
    assert!(branch.contains_book("B1"));
}

#[test]
fn removed_books_leave_the_branch() {
    let BranchFixture { mut branch, .. } = circulating();
    let removed = branch.remove_book("B1").expect("removable");
    assert_eq!(removed.current_branch(), None);
    assert!(!branch.contains_book("B1"));
    assert_eq!(branch.remove_book("B1").map(|_| ()).map_err(|e| e.kind()), Err(ErrorKind::NotFound));
}

#[test]
fn updates_touch_only_descriptive_fields() {
    let BranchFixture { mut branch, .. } = circulating();
    let update = BookUpdate { title: Some("Dune Messiah".to_owned()), author: None };

    let updated = branch.update_book("B1", update).expect("listed");

    assert_eq!(updated.title(), "Dune Messiah");
    assert_eq!(updated.isbn(), "B1");

    let renamed = branch
        .update_patron("P1", PatronUpdate { name: Some("Alicia".to_owned()), ..PatronUpdate::default() })
        .expect("registered");
    assert_eq!(renamed.name(), "Alicia");
}

#[test]
fn unknown_keys_are_not_found() {
    let BranchFixture { mut branch, .. } = circulating();
    assert_eq!(branch.checkout("B9", "P1").map_err(|e| e.kind()).err(), Some(ErrorKind::NotFound));
    assert_eq!(branch.checkout("B1", "P9").map_err(|e| e.kind()).err(), Some(ErrorKind::NotFound));
    assert_eq!(branch.reserve("B9", "P1").map_err(|e| e.kind()), Err(ErrorKind::NotFound));
}

#[test]
fn checkout_of_checked_out_book_is_invalid_state() {
    let BranchFixture { mut branch, .. } = circulating();
    branch.checkout("B1", "P1").expect("first checkout");

    let error = branch.checkout("B1", "P2").expect_err("already out");

    assert!(matches!(error, CirculationError::InvalidState { violation: StateViolation::NotAvailable, .. }));
    assert_eq!(branch.transactions().len(), 1);
}

#[test]
fn checkout_limit_is_enforced() {
    let mut fixture = branch_fixture("X", &["B1", "B2"], &[]);
    fixture.branch.add_patron(patron("P1").with_checkout_limit(1)).expect("patron");
    fixture.branch.checkout("B1", "P1").expect("first checkout");

    let error = fixture.branch.checkout("B2", "P1").expect_err("over limit");

    assert_eq!(error, CirculationError::LimitExceeded { patron_id: "P1".to_owned(), limit: 1 });
    assert!(fixture.branch.book("B2").is_some_and(Book::is_available));
}

#[test]
fn sixth_checkout_under_the_default_limit_changes_nothing() {
    let isbns = ["B1", "B2", "B3", "B4", "B5", "B6"];
    let BranchFixture { mut branch, .. } = branch_fixture("X", &isbns, &["P1"]);
    for isbn in isbns.iter().take(DEFAULT_CHECKOUT_LIMIT) {
        branch.checkout(isbn, "P1").expect("within the limit");
    }
    let logged = branch.transactions().len();

    let error = branch.checkout("B6", "P1").expect_err("over the limit");

    assert_eq!(error, CirculationError::LimitExceeded { patron_id: "P1".to_owned(), limit: 5 });
    assert_eq!(branch.book("B6").map(Book::status), Some(BookStatus::Available));
    assert_eq!(branch.transactions().len(), logged);
    assert_eq!(branch.patron("P1").map(Patron::checkout_count), Some(5));
}

#[test]
fn return_by_someone_else_is_wrong_holder() {
    let BranchFixture { mut branch, .. } = circulating();
    branch.checkout("B1", "P1").expect("checkout");

    let error = branch.return_book("B1", "P2").expect_err("not the holder");

    assert_eq!(error.kind(), ErrorKind::WrongHolder);
    assert_eq!(branch.book("B1").map(Book::status), Some(BookStatus::CheckedOut));
}

#[test]
fn return_of_shelved_book_is_invalid_state() {
    let BranchFixture { mut branch, .. } = circulating();
    let error = branch.return_book("B1", "P1").expect_err("not out");
    assert!(matches!(error, CirculationError::InvalidState { violation: StateViolation::NotCheckedOut, .. }));
}

#[test]
fn reserving_an_available_book_is_not_needed() {
    let BranchFixture { mut branch, .. } = circulating();
    let result = branch.reserve("B1", "P2");
    assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::ReservationNotNeeded));
    assert_eq!(branch.waitlist_size("B1"), 0);
    assert!(branch.waitlist("B1").is_none());
}

#[test]
fn reserving_twice_keeps_one_place() {
    let BranchFixture { mut branch, .. } = circulating();
    branch.checkout("B1", "P1").expect("checkout");

    assert_eq!(branch.reserve("B1", "P2"), Ok(true));
    assert_eq!(branch.reserve("B1", "P2"), Ok(false));

    assert_eq!(branch.waitlist_size("B1"), 1);
}

#[test]
fn hold_scenario_from_checkout_to_fulfilment() {
    let BranchFixture { mut branch, notices, .. } = circulating();

    branch.checkout("B1", "P1").expect("P1 checks out");
    assert!(branch.checkout("B1", "P2").is_err());
    branch.reserve("B1", "P2").expect("P2 reserves");
    assert_eq!(branch.waitlist_size("B1"), 1);

    branch.return_book("B1", "P1").expect("P1 returns");
    assert_eq!(branch.book("B1").map(Book::status), Some(BookStatus::Reserved));
    let notified: Vec<String> = notices.try_iter().map(|n| n.patron_id).collect();
    assert_eq!(notified, vec!["P2".to_owned()]);
    assert_eq!(branch.waitlist_size("B1"), 1);

    branch.checkout("B1", "P2").expect("P2 collects");
    assert_eq!(branch.book("B1").map(Book::status), Some(BookStatus::CheckedOut));
    assert_eq!(branch.waitlist_size("B1"), 0);
    assert!(branch.waitlists().next().is_none());
}

#[test]
fn reserved_book_is_refused_to_other_patrons() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");
    fixture.branch.return_book("B1", "P1").expect("return");

    let error = fixture.branch.checkout("B1", "P3").expect_err("held for P2");

    assert!(matches!(
        error,
        CirculationError::InvalidState { violation: StateViolation::HeldForAnotherPatron, .. }
    ));
}

#[test]
fn each_return_notifies_one_patron() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve P2");
    fixture.branch.reserve("B1", "P3").expect("reserve P3");

    fixture.branch.return_book("B1", "P1").expect("return");

    assert_eq!(fixture.notified(), vec!["P2".to_owned()]);
    assert_eq!(fixture.branch.waitlist_size("B1"), 2);
}

#[test]
fn cancelling_the_held_patron_passes_the_hold_on() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve P2");
    fixture.branch.reserve("B1", "P3").expect("reserve P3");
    fixture.branch.return_book("B1", "P1").expect("return");

    fixture.branch.cancel_reservation("B1", "P2").expect("cancel");

    assert_eq!(fixture.notified(), vec!["P2".to_owned(), "P3".to_owned()]);
    assert!(fixture.branch.waitlist("B1").is_some_and(|w| w.is_held_for("P3")));
    assert_eq!(fixture.branch.book("B1").map(Book::status), Some(BookStatus::Reserved));
}

#[test]
fn cancelling_the_last_holder_shelves_the_book() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");
    fixture.branch.return_book("B1", "P1").expect("return");

    fixture.branch.cancel_reservation("B1", "P2").expect("cancel");

    assert_eq!(fixture.branch.book("B1").map(Book::status), Some(BookStatus::Available));
    assert!(fixture.branch.waitlist("B1").is_none());
}

#[rstest]
#[case::no_waitlist("B1", "P2")]
#[case::not_queued("B1", "P3")]
fn cancelling_an_absent_reservation_fails(#[case] isbn: &str, #[case] patron_id: &str) {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    if patron_id == "P3" {
        fixture.branch.reserve("B1", "P2").expect("reserve");
    }

    let result = fixture.branch.cancel_reservation(isbn, patron_id);

    assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::NoSuchReservation));
}

#[test]
fn explicit_fulfilment_hands_the_hold_to_the_next_patron() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve P2");
    fixture.branch.reserve("B1", "P3").expect("reserve P3");
    fixture.branch.return_book("B1", "P1").expect("return");

    let fulfilled = fixture.branch.fulfill_reservation("B1").expect("waitlist exists");

    assert_eq!(fulfilled.as_deref(), Some("P2"));
    assert_eq!(fixture.notified(), vec!["P2".to_owned(), "P3".to_owned()]);
    assert_eq!(fixture.branch.waitlist_size("B1"), 1);
}

#[test]
fn fulfilling_a_title_without_waitlist_fails() {
    let BranchFixture { mut branch, .. } = circulating();

    let error = branch.fulfill_reservation("B1").expect_err("nobody waiting");

    assert_eq!(error, CirculationError::NoWaitlist { isbn: "B1".to_owned() });
    assert_eq!(error.kind(), ErrorKind::NoSuchReservation);
    assert_eq!(error.to_string(), "book B1 has no waitlist");
}

#[test]
fn notices_carry_the_branch_clock_time() {
    let BranchFixture { mut branch, clock, notices } = circulating();
    branch.checkout("B1", "P1").expect("checkout");
    branch.reserve("B1", "P2").expect("reserve");
    clock.advance(TimeDelta::days(3));

    branch.return_book("B1", "P1").expect("return");

    let raised: Vec<_> = notices.try_iter().map(|notice| notice.raised_at).collect();
    assert_eq!(raised, vec![opening_day() + TimeDelta::days(3)]);
    let hold = branch.waitlist("B1").and_then(ReservationManager::hold).expect("held for P2");
    assert_eq!(hold.notified_at, opening_day() + TimeDelta::days(3));
}

#[test]
fn stale_holds_expire_under_a_hold_period() {
    let mut fixture = circulating();
    let policy = CirculationPolicy { hold_period_hours: Some(24), ..CirculationPolicy::default() };
    fixture.branch = fixture.branch.with_policy(policy);
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve P2");
    fixture.branch.reserve("B1", "P3").expect("reserve P3");
    fixture.branch.return_book("B1", "P1").expect("return");

    fixture.clock.advance(TimeDelta::hours(23));
    assert!(fixture.branch.expire_holds().is_empty());

    fixture.clock.advance(TimeDelta::hours(2));
    let expired = fixture.branch.expire_holds();

    assert_eq!(expired.len(), 1);
    assert!(expired.first().is_some_and(|e| e.isbn == "B1" && e.hold.patron_id == "P2"));
    assert!(fixture.branch.waitlist("B1").is_some_and(|w| w.is_held_for("P3")));
    assert_eq!(fixture.notified(), vec!["P2".to_owned(), "P3".to_owned()]);
}

#[test]
fn holds_never_expire_by_default() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");
    fixture.branch.return_book("B1", "P1").expect("return");

    fixture.clock.advance(TimeDelta::days(365));

    assert!(fixture.branch.expire_holds().is_empty());
    assert!(fixture.branch.waitlist("B1").is_some_and(|w| w.is_held_for("P2")));
}

#[test]
fn overdue_checkouts_are_reported() {
    let mut fixture = branch_fixture("X", &["B1", "B2"], &["P1"]);
    fixture.branch.checkout("B1", "P1").expect("checkout B1");
    fixture.branch.checkout("B2", "P1").expect("checkout B2");
    fixture.clock.advance(TimeDelta::days(10));
    fixture.branch.return_book("B2", "P1").expect("return B2");

    fixture.clock.advance(TimeDelta::days(5));
    let overdue = fixture.branch.overdue_transactions();

    assert_eq!(overdue.len(), 1);
    assert!(overdue.first().is_some_and(|tx| tx.isbn() == "B1"));
}

#[test]
fn transactions_are_logged_and_retrievable() {
    let BranchFixture { mut branch, .. } = circulating();
    let checkout = branch.checkout("B1", "P1").expect("checkout");
    let checkin = branch.return_book("B1", "P1").expect("return");

    assert_eq!(branch.transactions().len(), 2);
    let logged = branch.transaction(checkout.transaction.id()).expect("logged");
    assert!(logged.returned_at().is_some());
    let logged_return = branch.transaction(checkin.transaction.id()).expect("logged");
    assert_eq!(logged_return.kind(), TransactionKind::Return);
    assert_eq!(branch.transaction(Uuid::new_v4()).map_err(|e| e.kind()).err(), Some(ErrorKind::NotFound));
}

#[test]
fn undoing_a_checkout_rehands_the_book_to_the_waitlist() {
    let mut fixture = circulating();
    let receipt = fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");

    fixture.branch.compensate(&receipt.compensation).expect("compensate");

    assert_eq!(fixture.branch.book("B1").map(Book::status), Some(BookStatus::Reserved));
    assert!(fixture.branch.patron("P1").is_some_and(|p| !p.holds("B1")));
    assert_eq!(fixture.notified(), vec!["P2".to_owned()]);
}

#[test]
fn undone_checkout_leaves_no_open_loan_behind() {
    let BranchFixture { mut branch, .. } = circulating();
    let receipt = branch.checkout("B1", "P1").expect("checkout");
    branch.compensate(&receipt.compensation).expect("compensate");

    branch.checkout("B1", "P1").expect("checkout again");
    let reader = branch.patron("P1").expect("registered");
    let open = reader.borrowing_history().iter().filter(|record| !record.is_returned()).count();
    assert_eq!(open, 1);

    branch.return_book("B1", "P1").expect("return");

    let reader = branch.patron("P1").expect("registered");
    assert_eq!(reader.borrowing_history().len(), 2);
    assert!(reader.borrowing_history().iter().all(BorrowingRecord::is_returned));
    assert_eq!(branch.audit(), Vec::new());
}

#[test]
fn undone_checkout_is_never_overdue() {
    let mut fixture = circulating();
    let receipt = fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.compensate(&receipt.compensation).expect("compensate");

    fixture.clock.advance(TimeDelta::days(30));

    assert!(fixture.branch.overdue_transactions().is_empty());
    let logged = fixture.branch.transaction(receipt.transaction.id()).expect("still logged");
    assert_eq!(logged.returned_at(), Some(opening_day()));
}

#[test]
fn undoing_a_return_withdraws_the_hold() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");
    let receipt = fixture.branch.return_book("B1", "P1").expect("return");

    fixture.branch.compensate(&receipt.compensation).expect("compensate");

    assert_eq!(fixture.branch.book("B1").map(Book::status), Some(BookStatus::CheckedOut));
    assert!(fixture.branch.patron("P1").is_some_and(|p| p.holds("B1")));
    let waitlist = fixture.branch.waitlist("B1").expect("still queued");
    assert_eq!(waitlist.head(), Some("P2"));
    assert!(waitlist.hold().is_none());
}

#[test]
fn clean_branch_has_no_anomalies() {
    let mut fixture = circulating();
    fixture.branch.checkout("B1", "P1").expect("checkout");
    fixture.branch.reserve("B1", "P2").expect("reserve");
    fixture.branch.return_book("B1", "P1").expect("return");
    fixture.branch.checkout("B1", "P2").expect("collect");

    assert_eq!(fixture.branch.audit(), Vec::new());
}

#[test]
fn blank_branch_id_is_rejected() {
    let result = BranchInventory::new(" ", "Nowhere", "");
    assert_eq!(result.map(|_| ()).map_err(|e| e.kind()), Err(ErrorKind::InvalidInput));
}
