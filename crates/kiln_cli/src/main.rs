//! Kiln CLI: inspect and diff the incremental build state of a target.
//!
//! Provides `kiln state` to dump a source state snapshot, `kiln stats` to
//! show the statistics and configuration digest of a target, and `kiln diff`
//! to classify source files against a snapshot.

#![warn(missing_docs)]

mod diff;
mod project;
mod state;
mod stats;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "KILN_LOG";

/// Kiln: incremental build state inspector.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build state tools")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file or its directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the metadata and rows of a source state file.
    State(StateArgs),
    /// Print the statistics and configuration digest of a target stats file.
    Stats(StatsArgs),
    /// Hash source files and classify them against a source state file.
    Diff(DiffArgs),
}

/// Arguments for the `kiln state` subcommand.
#[derive(Parser, Debug)]
pub struct StateArgs {
    /// Source state file to read.
    pub file: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `kiln stats` subcommand.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Target stats file to read.
    pub file: PathBuf,
}

/// Arguments for the `kiln diff` subcommand.
#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// Source state file to compare against.
    pub file: PathBuf,

    /// Current source files of the target.
    #[arg(num_args = 0..)]
    pub sources: Vec<PathBuf>,

    /// Target name whose path roots from `kiln.toml` are used.
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::State(ref args) => state::run(args, &global),
        Command::Stats(ref args) => stats::run(args, &global),
        Command::Diff(ref args) => diff::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Default log filter for the given verbosity flags.
fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose, quiet)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_state_text() {
        let cli = Cli::parse_from(["kiln", "state", ".kiln/app/sources.kst"]);
        match cli.command {
            Command::State(ref args) => {
                assert_eq!(args.file, PathBuf::from(".kiln/app/sources.kst"));
                assert!(!args.json);
            }
            _ => panic!("expected State command"),
        }
    }

    #[test]
    fn parse_state_json() {
        let cli = Cli::parse_from(["kiln", "state", "s.kst", "--json"]);
        match cli.command {
            Command::State(ref args) => assert!(args.json),
            _ => panic!("expected State command"),
        }
    }

    #[test]
    fn parse_stats() {
        let cli = Cli::parse_from(["kiln", "stats", "stats.kv"]);
        match cli.command {
            Command::Stats(ref args) => assert_eq!(args.file, PathBuf::from("stats.kv")),
            _ => panic!("expected Stats command"),
        }
    }

    #[test]
    fn parse_diff_with_sources() {
        let cli = Cli::parse_from([
            "kiln", "diff", "s.kst", "src/a.kt", "src/b.kt", "--target", "app",
        ]);
        match cli.command {
            Command::Diff(ref args) => {
                assert_eq!(args.file, PathBuf::from("s.kst"));
                assert_eq!(
                    args.sources,
                    vec![PathBuf::from("src/a.kt"), PathBuf::from("src/b.kt")]
                );
                assert_eq!(args.target.as_deref(), Some("app"));
            }
            _ => panic!("expected Diff command"),
        }
    }

    #[test]
    fn parse_diff_without_sources() {
        let cli = Cli::parse_from(["kiln", "diff", "s.kst"]);
        match cli.command {
            Command::Diff(ref args) => {
                assert!(args.sources.is_empty());
                assert!(args.target.is_none());
            }
            _ => panic!("expected Diff command"),
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["kiln", "--quiet", "--config", "proj/kiln.toml", "stats", "x"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("proj/kiln.toml")));
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::parse_from(["kiln", "state", "s.kst", "-v"]);
        assert!(cli.verbose);
    }

    #[test]
    fn filter_levels() {
        assert_eq!(default_filter(false, false), "warn");
        assert_eq!(default_filter(true, false), "debug");
        assert_eq!(default_filter(true, true), "error");
    }
}
