#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use revlite::{FsError, Repository};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "revlite", about = "Administer revlite repositories", version)]
struct Cli {
    /// Print the full error chain on failure.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new repository.
    Create { path: PathBuf },
    /// Print the youngest revision and basic repository facts.
    Info { path: PathBuf },
    /// Verify the indexes of one revision, or of all revisions.
    Verify {
        path: PathBuf,
        #[arg(long)]
        revision: Option<u64>,
    },
    /// List open transactions.
    Lstxns { path: PathBuf },
    /// Remove an open transaction.
    Rmtxn { path: PathBuf, name: String },
}

fn run(cli: &Cli) -> Result<(), FsError> {
    match &cli.command {
        Command::Create { path } => {
            Repository::create(path)?;
            println!("created repository at '{}'", path.display());
        }
        Command::Info { path } => {
            let repo = Repository::open(path)?;
            let youngest = repo.youngest()?;
            let txns = repo.list_transactions()?;
            println!("youngest revision: {youngest}");
            println!("open transactions: {}", txns.len());
            let props = repo.revision_proplist(youngest)?;
            if let Some(date) = props.get("svn:date") {
                println!("last commit date: {}", String::from_utf8_lossy(date));
            }
        }
        Command::Verify { path, revision } => {
            let repo = Repository::open(path)?;
            match revision {
                Some(revision) => repo.verify_revision(*revision)?,
                None => repo.verify()?,
            }
            println!("verified ok");
        }
        Command::Lstxns { path } => {
            let repo = Repository::open(path)?;
            for name in repo.list_transactions()? {
                println!("{name}");
            }
        }
        Command::Rmtxn { path, name } => {
            let repo = Repository::open(path)?;
            repo.purge_txn(name)?;
            println!("removed transaction {name}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("revlite: E{}: {err}", err.code());
            if cli.verbose {
                let mut source = std::error::Error::source(&err);
                while let Some(cause) = source {
                    eprintln!("revlite: caused by: {cause}");
                    source = cause.source();
                }
            }
            ExitCode::FAILURE
        }
    }
}
