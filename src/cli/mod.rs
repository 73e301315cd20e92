//! CLI layer: argument parsing, command dispatch, and subcommand implementations.

pub mod args;
mod info;

pub use args::*;
pub use info::cmd_info_json;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use repohist::{
    canonical_or_absolute, CommandTimeoutType, Configuration, HistoryError, HistoryOrchestrator, Repository,
};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Repository discovery and history/annotation cache for multi-VCS source trees
#[derive(Parser, Debug)]
#[command(name = "repohist", version, about, after_help = "\
Run 'repohist <COMMAND> --help' for detailed options and examples.\n\
Common options: --config <FILE> (JSON configuration), --log-level <LEVEL>")]
pub(crate) struct Cli {
    /// Configuration file (JSON); every field is optional
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Discover repositories and print them
    Scan(ScanArgs),

    /// Populate or update the history cache of repositories
    Index(IndexArgs),

    /// Print the history of a file or directory
    History(HistoryArgs),

    /// Print per-line annotation of a file
    Annotate(AnnotateArgs),

    /// Print the contents of a file at a revision
    Show(ShowArgs),

    /// Clear the history and annotation caches of repositories
    Clear(ClearArgs),

    /// Print a JSON summary of repositories and cache state
    Info,
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Scan(args) => cmd_scan(config, args),
        Commands::Index(args) => cmd_index(config, args),
        Commands::History(args) => cmd_history(config, args),
        Commands::Annotate(args) => cmd_annotate(config, args),
        Commands::Show(args) => cmd_show(config, args),
        Commands::Clear(args) => cmd_clear(config, args),
        Commands::Info => cmd_info(config),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

pub(crate) fn parse_log_level(level: &str) -> tracing::Level {
    match level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Configuration, HistoryError> {
    match path {
        Some(p) => Configuration::load(p),
        None => Ok(Configuration::default()),
    }
}

/// Orchestrator with every repository under `dirs` (the source root when empty) registered.
fn discover(
    config: Configuration,
    dirs: &[PathBuf],
    kind: CommandTimeoutType,
) -> Result<HistoryOrchestrator, HistoryError> {
    let orch = HistoryOrchestrator::new(config)?;
    let dirs: Vec<PathBuf> = if dirs.is_empty() {
        vec![orch.config().source_root()]
    } else {
        dirs.iter().map(|d| canonical_or_absolute(d)).collect()
    };
    let found = orch.add_repositories(&dirs, kind);
    debug!(repositories = found.len(), "Registered repositories");
    Ok(orch)
}

/// Registered repositories rooted at `roots`, or all of them when empty.
fn select_repositories(orch: &HistoryOrchestrator, roots: &[PathBuf]) -> Result<Vec<Arc<dyn Repository>>, HistoryError> {
    if roots.is_empty() {
        return Ok(orch.registry().repositories());
    }
    roots
        .iter()
        .map(|root| {
            orch.registry()
                .repository_at(&canonical_or_absolute(root))
                .ok_or_else(|| HistoryError::Usage(format!("{} is not a known repository root", root.display())))
        })
        .collect()
}

// ─── Commands ───────────────────────────────────────────────────────

fn cmd_scan(config: Configuration, args: ScanArgs) -> Result<(), HistoryError> {
    let orch = discover(config, &args.dirs, CommandTimeoutType::Indexer)?;
    let repos = orch.get_repositories();
    for info in &repos {
        println!(
            "{:<10} {}{}",
            info.kind,
            info.directory_relative,
            info.branch.as_deref().map(|b| format!(" [{}]", b)).unwrap_or_default()
        );
    }
    eprintln!("Found {} repositories.", repos.len());
    Ok(())
}

fn cmd_index(config: Configuration, args: IndexArgs) -> Result<(), HistoryError> {
    let orch = discover(config, &[], CommandTimeoutType::Indexer)?;
    let repos = select_repositories(&orch, &args.repos)?;
    if args.full {
        let roots: Vec<PathBuf> = repos.iter().map(|r| r.directory().to_path_buf()).collect();
        let cleared = orch.clear_cache(&roots);
        eprintln!("Cleared cache of {} repositories.", cleared.len());
    }

    eprintln!("Indexing {} repositories...", repos.len());
    let mut failures = 0usize;
    let mut results = orch.create_cache(&repos);
    results.sort_by(|a, b| a.0.directory().cmp(b.0.directory()));
    for (repo, result) in results {
        let root = &repo.info().directory_relative;
        match result {
            Ok(Some(summary)) => {
                if summary.failed > 0 {
                    failures += 1;
                }
                println!(
                    "{}: {} files, {} renamed, {} failed, latest {}",
                    root,
                    summary.files,
                    summary.renamed,
                    summary.failed,
                    summary.latest_revision.as_deref().unwrap_or("-")
                );
            }
            Ok(None) => println!("{}: skipped (no history cache support)", root),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", root, e);
            }
        }
    }
    if failures > 0 {
        eprintln!("{} repositories were not fully indexed.", failures);
    }
    Ok(())
}

fn cmd_history(config: Configuration, args: HistoryArgs) -> Result<(), HistoryError> {
    let kind = if args.ui { CommandTimeoutType::Interactive } else { CommandTimeoutType::Indexer };
    let orch = discover(config, &[], kind)?;
    let file = canonical_or_absolute(&args.file);
    let Some(history) = orch.get_history(&file, args.files, args.ui)? else {
        eprintln!("No history available for {}", args.file.display());
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for entry in history.entries() {
        write!(out, "{} {} {}", entry.revision, entry.date, entry.author)?;
        if let Some(tags) = entry.tags_display() {
            write!(out, " ({})", tags)?;
        }
        writeln!(out)?;
        for line in entry.message.lines() {
            writeln!(out, "    {}", line)?;
        }
        for f in &entry.files {
            writeln!(out, "  {}", f)?;
        }
    }
    Ok(())
}

fn cmd_annotate(config: Configuration, args: AnnotateArgs) -> Result<(), HistoryError> {
    let orch = discover(config, &[], CommandTimeoutType::Interactive)?;
    let file = canonical_or_absolute(&args.file);
    let Some(annotation) = orch.annotate(&file, args.rev.as_deref())? else {
        eprintln!("No annotation available for {}", args.file.display());
        return Ok(());
    };

    // Contents are only shown for the working copy; older revisions print blame alone.
    let contents = if args.rev.is_none() {
        std::fs::read(&file)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    } else {
        String::new()
    };
    let mut lines = contents.lines();
    let rev_width = annotation.widest_revision();
    let author_width = annotation.widest_author();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in annotation.lines() {
        let version = annotation
            .file_version(&line.revision)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:>4} {:<rw$} {:<aw$} | {}",
            version,
            line.revision,
            line.author,
            lines.next().unwrap_or(""),
            rw = rev_width,
            aw = author_width
        )?;
    }
    Ok(())
}

fn cmd_show(config: Configuration, args: ShowArgs) -> Result<(), HistoryError> {
    let orch = discover(config, &[], CommandTimeoutType::Interactive)?;
    let file = canonical_or_absolute(&args.file);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if !orch.get_revision(&mut out, &file, &args.rev)? {
        return Err(HistoryError::Usage(format!(
            "{} does not exist at revision {}",
            args.file.display(),
            args.rev
        )));
    }
    out.flush()?;
    Ok(())
}

fn cmd_clear(config: Configuration, args: ClearArgs) -> Result<(), HistoryError> {
    let orch = discover(config, &[], CommandTimeoutType::Indexer)?;
    let roots: Vec<PathBuf> = select_repositories(&orch, &args.repos)?
        .iter()
        .map(|r| r.directory().to_path_buf())
        .collect();
    let cleared = orch.clear_cache(&roots);
    for root in &cleared {
        println!("{}", root.display());
    }
    eprintln!("Cleared cache of {} of {} repositories.", cleared.len(), roots.len());
    Ok(())
}

fn cmd_info(config: Configuration) -> Result<(), HistoryError> {
    let orch = discover(config, &[], CommandTimeoutType::Interactive)?;
    println!("{}", serde_json::to_string_pretty(&cmd_info_json(&orch))?);
    Ok(())
}
