//! Renderings of the book lifecycle and of circulation logs.

use std::{fs::File, io::Write, path::Path};

use crate::{book_status::BookStatus, events::BookEvent, transaction::Transaction};

/// Graphviz DOT for the lifecycle table, optionally marking one status
#[must_use]
pub fn lifecycle_dot(highlight: Option<BookStatus>) -> String {
    let mut dot = String::from("digraph book_lifecycle {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [shape=circle, style=filled, fillcolor=lightblue];\n");

    for status in BookStatus::ALL {
        let tooltip = status.description();
        if highlight == Some(status) {
            dot.push_str(&format!(
                "  {status} [tooltip=\"{tooltip}\", fillcolor=palegreen, peripheries=2];\n"
            ));
        } else {
            dot.push_str(&format!("  {status} [tooltip=\"{tooltip}\"];\n"));
        }
    }

    for from in BookStatus::ALL {
        for event in BookEvent::ALL {
            if let Some(to) = from.next(event) {
                dot.push_str(&format!("  {from} -> {to} [label=\"{event}\"];\n"));
            }
        }
    }

    dot.push_str("}\n");
    dot
}

/// Save a DOT document to `path`
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to
pub fn save_dot_to_file(dot: &str, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
    let mut file = File::create(path)?;
    file.write_all(dot.as_bytes())?;
    Ok(())
}

/// Markdown table of a circulation log
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub fn transaction_table(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions recorded yet.".to_owned();
    }

    let mut table = String::from("| # | Type | Book | Patron | When | Due | Returned |\n");
    table.push_str("|---|------|------|--------|------|-----|----------|\n");

    for (i, tx) in transactions.iter().enumerate() {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            tx.kind(),
            tx.isbn(),
            tx.patron_id(),
            tx.occurred_at().format("%Y-%m-%d %H:%M"),
            tx.due_at().map_or_else(|| "-".to_owned(), |due| due.format("%Y-%m-%d").to_string()),
            tx.returned_at().map_or_else(|| "-".to_owned(), |at| at.format("%Y-%m-%d").to_string()),
        ));
    }

    table
}
