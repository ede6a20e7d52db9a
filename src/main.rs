use std::{
    error::Error,
    fmt::Display,
    path::PathBuf,
    sync::{Arc, mpsc},
};

use branch_circulation::{
    Book, BranchInventory, ChannelNotifier, CirculationError, CirculationPolicy, Notice, Patron,
    SystemRegistry, visualization,
};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the circulation demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with the circulation policy
    #[arg(short, long)]
    policy: Option<PathBuf>,

    /// Log every status transition
    #[arg(short, long)]
    verbose: bool,

    /// Print the book lifecycle as a Graphviz DOT graph
    #[arg(long)]
    dot: bool,

    /// Write the book lifecycle DOT graph to this file
    #[arg(long, value_name = "PATH")]
    dot_file: Option<PathBuf>,

    /// Print a JSON snapshot of the registry at the end
    #[arg(long)]
    json: bool,
}

/// Run the checkout, waitlist and transfer scenario across two branches
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let policy = match &args.policy {
        Some(path) => CirculationPolicy::from_json_file(path)?,
        None => CirculationPolicy::default(),
    };

    println!("{}", "Library Circulation Demonstration".green().bold());
    println!("=================================\n");

    if args.dot {
        println!("{}", visualization::lifecycle_dot(None));
    }
    if let Some(path) = &args.dot_file {
        visualization::save_dot_to_file(&visualization::lifecycle_dot(None), path)?;
        println!("Lifecycle graph written to {}", path.display());
    }

    let (sender, notices) = mpsc::channel();
    let notifier = Arc::new(ChannelNotifier::new(sender));
    let mut registry = SystemRegistry::new();
    registry.add_branch(
        BranchInventory::new("downtown", "Downtown Library", "1 Main Street")?
            .with_policy(policy.clone())
            .with_notifier(notifier.clone()),
    )?;
    registry.add_branch(
        BranchInventory::new("riverside", "Riverside Library", "40 Quay Road")?
            .with_policy(policy)
            .with_notifier(notifier),
    )?;

    let downtown = registry.branch_mut("downtown")?;
    downtown.add_book(Book::new("B1", "The Left Hand of Darkness", "Ursula K. Le Guin", 1969)?)?;
    downtown.add_book(Book::new("B2", "Invisible Cities", "Italo Calvino", 1972)?)?;
    downtown.add_patron(Patron::new("P1", "Ada")?.with_email("ada@example.org"))?;
    downtown.add_patron(Patron::new("P2", "Grace")?.with_phone("555-0102"))?;

    println!("{}", "Checkout and waitlist".yellow().bold());
    step("P1 checks out B1", downtown.checkout("B1", "P1"));
    step("P2 checks out B1", downtown.checkout("B1", "P2"));
    step("P2 reserves B1", downtown.reserve("B1", "P2"));
    println!("  waitlist size for B1: {}", downtown.waitlist_size("B1"));
    step("P1 returns B1", downtown.return_book("B1", "P1"));
    print_notices(&notices);
    println!("  waitlist size for B1: {}", downtown.waitlist_size("B1"));
    step("P2 checks out B1", downtown.checkout("B1", "P2"));
    println!("  waitlist size for B1: {}", downtown.waitlist_size("B1"));

    println!("\n{}", "Transfers".yellow().bold());
    step("move B2 downtown -> riverside", registry.transfer("B2", "downtown", "riverside"));
    step("move B1 downtown -> riverside", registry.transfer("B1", "downtown", "riverside"));
    if let Some((branch, book)) = registry.find_book_across_branches("B2") {
        println!("  B2 is {} at {}", book.status(), branch.name());
    }

    println!("\n{}", "Downtown transactions".yellow().bold());
    println!("{}", visualization::transaction_table(registry.branch("downtown")?.transactions()));

    let anomalies = registry.audit();
    if anomalies.is_empty() {
        println!("{}", "Audit: no anomalies".green());
    } else {
        for anomaly in &anomalies {
            println!("{} {anomaly}", "Audit:".red().bold());
        }
    }

    if args.json {
        println!("{}", registry.snapshot().to_json_pretty()?);
    }

    println!("\n{}", "Demonstration complete!".green().bold());
    Ok(())
}

/// Print the outcome of one demo step
fn step<T: Display>(label: &str, outcome: Result<T, CirculationError>) {
    match outcome {
        Ok(value) => println!("  {} {label}: {value}", "ok".green()),
        Err(error) => println!("  {} {label}: {error}", "refused".red()),
    }
}

/// Print and drain the notices raised so far
fn print_notices(notices: &mpsc::Receiver<Notice>) {
    for notice in notices.try_iter() {
        println!(
            "  {} {} ({}) may collect \"{}\"",
            "notice".cyan(),
            notice.patron_name,
            notice.email.as_deref().unwrap_or("no email"),
            notice.title
        );
    }
}
