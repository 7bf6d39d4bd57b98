//! Thin operational CLI: each subcommand invokes the corresponding
//! `terna::admin` operation and prints its report as pretty JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use terna::admin::{self, AdminOpenOptions};

#[derive(Parser)]
#[command(name = "terna", version, about = "Terna triple-store maintenance tool")]
struct Cli {
    /// Emit tracing output (honors RUST_LOG).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify page integrity; --strict additionally cross-checks the three
    /// orderings against each other.
    Check {
        /// Database path.
        db: PathBuf,
        /// Run the cross-ordering consistency comparison as well.
        #[arg(long)]
        strict: bool,
    },
    /// Rebuild corrupted pages from the authoritative triple set.
    Repair {
        /// Database path.
        db: PathBuf,
        /// Rebuild only the affected primaries instead of whole orderings.
        #[arg(long)]
        fast: bool,
    },
    /// Run one hotness-driven compaction cycle plus garbage collection.
    AutoCompact {
        /// Database path.
        db: PathBuf,
        /// Candidate budget for the cycle.
        #[arg(long, default_value_t = 8)]
        limit: usize,
    },
    /// Print filesystem, manifest, staging, and dictionary statistics.
    Stats {
        /// Database path.
        db: PathBuf,
    },
    /// Print remembered and pending transaction ids.
    Txids {
        /// Database path.
        db: PathBuf,
    },
}

fn print_report<T: Serialize>(report: &T) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to render report: {err}"),
    }
}

fn run(cli: Cli) -> admin::Result<bool> {
    let opts = AdminOpenOptions::default();
    match cli.command {
        Command::Check { db, strict } => {
            let report = admin::check(db, &opts, strict)?;
            print_report(&report);
            Ok(report.ok)
        }
        Command::Repair { db, fast } => {
            let report = if fast {
                admin::repair_corrupted_pages_fast(db, &opts)?
            } else {
                admin::repair_corrupted_orders(db, &opts)?
            };
            print_report(&report);
            Ok(report.ok_after)
        }
        Command::AutoCompact { db, limit } => {
            let report = admin::auto_compact(db, &opts, limit)?;
            print_report(&report);
            Ok(true)
        }
        Command::Stats { db } => {
            let report = admin::stats(db, &opts)?;
            print_report(&report);
            Ok(true)
        }
        Command::Txids { db } => {
            let report = admin::txids(db, &opts)?;
            print_report(&report);
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
