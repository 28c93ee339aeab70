//! tl-store - administration tool for the translation store
//!
//! Configuration comes from `--config FILE` (TOML) and `TL_*` environment
//! variables, see [`tl_store::config`]. Log verbosity follows `RUST_LOG`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tl_store::store::LocalBackend;
use tl_store::{Config, Filter, Limit, Repository, Store};

#[derive(Parser, Debug)]
#[command(name = "tl-store")]
#[command(version, about = "Translation store administration", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (overrides configuration)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the store content with a backup
    Restore { file: PathBuf },
    #[command(flatten)]
    Repo(RepoCommand),
}

/// Commands that run against an open store
#[derive(Subcommand, Debug)]
enum RepoCommand {
    /// List books, most recently active first
    List,
    /// Print a window of a book's fragments
    Show {
        book: u64,
        /// Filter kind followed by its arguments, e.g. `orig-length more 20 words`
        #[arg(long, num_args = 1.., value_name = "KIND")]
        filter: Vec<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Page size; everything when omitted
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export a book as JSON
    Export {
        book: u64,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Import a book from exported JSON
    Import { file: PathBuf },
    /// Write a consistent backup of the whole store
    Backup { file: PathBuf },
    /// Snapshot the store and drop covered WAL files
    Compact,
    /// Audit counters and links
    Check,
    /// Recompute book counters (all books when none given)
    Rebuild { book: Option<u64> },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    init_tracing(config.log.json);

    let result = match cli.command {
        // Restore replaces the files an open store would hold
        Command::Restore { file } => restore(&file, &config),
        Command::Repo(command) => run(command, config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn restore(file: &Path, config: &Config) -> CliResult {
    let data = fs::read(file)?;
    let backend = LocalBackend::new(&config.store.data_dir)?;
    let meta = Store::restore_backup(&backend, &data)?;
    println!("restored txid {} ({} buckets)", meta.txid, meta.bucket_count);
    Ok(())
}

fn run(command: RepoCommand, config: Config) -> CliResult {
    let repo = Repository::open(config.store, config.repo)?;

    match command {
        RepoCommand::List => {
            for book in repo.list_books_by_activity()? {
                println!(
                    "{:>6}  {:>5}/{:<5}  {}",
                    book.id, book.fragments_translated, book.fragments_total, book.title
                );
            }
        }
        RepoCommand::Show {
            book,
            filter,
            offset,
            limit,
        } => {
            let filter = match filter.split_first() {
                Some((kind, args)) => {
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    Filter::from_parts(kind, &args)?
                }
                None => Filter::None,
            };
            let limit = limit.map_or(Limit::All, Limit::Count);
            let page = repo.get_book_with_fragments(book, offset, limit, &filter)?;
            println!(
                "{} ({} of {} fragments match)",
                page.book.title,
                page.matching_ids.len(),
                page.book.fragments_total
            );
            for view in &page.fragments {
                let star = if view.fragment.starred { "*" } else { " " };
                println!("{:>5}{} {}", view.seq_num, star, view.fragment.text);
                for version in &view.versions {
                    println!("        > {}", version.text);
                }
                if !view.fragment.comment.is_empty() {
                    println!("        # {}", view.fragment.comment);
                }
            }
        }
        RepoCommand::Export { book, output } => {
            let data = repo.export_book_json(book)?;
            match output {
                Some(path) => fs::write(path, data)?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&data)?;
                    stdout.write_all(b"\n")?;
                }
            }
        }
        RepoCommand::Import { file } => {
            let data = fs::read(file)?;
            let bid = repo.import_book_json(&data)?;
            println!("imported as book {}", bid);
        }
        RepoCommand::Backup { file } => {
            let mut out = fs::File::create(&file)?;
            let bytes = repo.store().backup(&mut out)?;
            out.sync_all()?;
            info!(file = %file.display(), bytes, "backup written");
        }
        RepoCommand::Compact => {
            let stats = repo.store().compact()?;
            println!(
                "compacted at txid {}: {} WAL files and {} snapshots removed",
                stats.txid, stats.wal_files_removed, stats.snapshots_removed
            );
        }
        RepoCommand::Check => {
            let report = repo.check_integrity()?;
            for issue in &report.issues {
                println!("{}", issue);
            }
            println!("{} books checked, {} issues", report.books_checked, report.issues.len());
            if !report.is_clean() {
                return Err("integrity check found issues".into());
            }
        }
        RepoCommand::Rebuild { book } => {
            let reports = match book {
                Some(bid) => vec![repo.rebuild_counters(bid)?],
                None => repo.rebuild_all_counters()?,
            };
            for r in reports.iter().filter(|r| r.changed()) {
                println!(
                    "book {}: total {} -> {}, translated {} -> {}",
                    r.bid,
                    r.fragments_total.0,
                    r.fragments_total.1,
                    r.fragments_translated.0,
                    r.fragments_translated.1
                );
            }
        }
    }
    repo.store().close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore_and_store_commands() {
        let cli = Cli::try_parse_from(["tl-store", "restore", "backup.snap"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Restore { ref file } if file == Path::new("backup.snap")
        ));

        let args = ["tl-store", "--data-dir", "d", "show", "3", "--limit", "10"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Repo(RepoCommand::Show { book: 3, limit: Some(10), offset: 0, .. })
        ));
        assert_eq!(cli.data_dir.as_deref(), Some(Path::new("d")));
    }
}
