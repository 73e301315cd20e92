//! CLI argument structs for all subcommands.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  repohist scan                      Discover repositories under the source root
  repohist scan /src/a /src/b        Discover repositories under the given directories
"#)]
pub struct ScanArgs {
    /// Directories to scan (default: the configured source root)
    pub dirs: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  repohist index                     Populate or update the cache of every repository
  repohist index /src/proj --full    Rebuild the cache of one repository from scratch
"#)]
pub struct IndexArgs {
    /// Repository roots to index (default: every discovered repository)
    pub repos: Vec<PathBuf>,

    /// Clear the existing cache first instead of updating it incrementally
    #[arg(long)]
    pub full: bool,
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// File or directory inside a repository
    pub file: PathBuf,

    /// Treat the request as interactive (relevant for remote repositories)
    #[arg(long)]
    pub ui: bool,

    /// List the files touched by each changeset
    #[arg(long)]
    pub files: bool,

    /// Print the history as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct AnnotateArgs {
    /// File inside a repository
    pub file: PathBuf,

    /// Revision to annotate (default: latest)
    #[arg(short, long)]
    pub rev: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// File inside a repository
    pub file: PathBuf,

    /// Revision whose contents to print
    #[arg(short, long)]
    pub rev: String,
}

#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Repository roots whose cache to clear (default: every discovered repository)
    pub repos: Vec<PathBuf>,
}
