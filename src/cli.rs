//! # Command-Line Interface Module
//!
//! Command-line interface for playchart, defined with Clap derive macros.
//!
//! ## Commands
//!
//! - `import`: Seed the catalog from MPD's library and play counters
//! - `chart`: Show the most played songs for a time window
//! - `watch`: Track plays in the foreground
//! - `daemon`: Track plays in the background
//! - `reset`: Forget every song and play
//!
//! ## Examples
//!
//! ```bash
//! playchart import
//! playchart chart --filter this-week --limit 20
//! playchart daemon start
//! ```

use crate::aggregation::TimeFilter;
use crate::notification::NotifierKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
///
/// Global options override values from `config.json`.
#[derive(Parser, Debug)]
#[command(name = "playchart")]
#[command(about = "Playchart: your most played songs, ranked, from MPD play counts")]
#[command(version)]
pub struct Args {
    /// Catalog database to use instead of the one in the data directory
    #[arg(long, global = true, env = "PLAYCHART_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// MPD host, passed to mpc as MPD_HOST (e.g. password@localhost)
    #[arg(long, global = true, env = "MPD_HOST")]
    pub mpd_host: Option<String>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import MPD's library into an empty catalog
    ///
    /// Each song's current play counter becomes its baseline. Does nothing
    /// when the catalog already has songs.
    Import {
        /// Songs saved per transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show the most played songs
    ///
    /// Re-ranks the catalog for the chosen window and prints the top entries
    /// with their movement since the last time that chart was computed.
    Chart {
        /// Time window to rank by
        #[arg(short, long, value_enum, default_value = "all-time")]
        filter: TimeFilter,

        /// Number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print the chart as JSON
        #[arg(long)]
        json: bool,
    },

    /// Track plays in the foreground until interrupted
    Watch {
        /// How rank changes are announced
        #[arg(long, value_enum)]
        notifier: Option<NotifierKind>,
    },

    /// Manage the play tracking daemon
    ///
    /// The daemon watches MPD in the background and keeps the charts current
    /// for all playback, whichever client started it.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Delete every song, play and rank from the catalog
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: playchart completion bash > ~/.local/share/bash-completion/completions/playchart
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List chart filters for completion (hidden command)
    #[command(hide = true)]
    CompleteFilters,
}

/// Daemon management actions
#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the play tracking daemon
    Start,

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_chart_defaults_to_all_time() {
        let args = Args::try_parse_from(["playchart", "chart"]).unwrap();
        match args.command {
            Command::Chart { filter, limit, json } => {
                assert_eq!(filter, TimeFilter::AllTime);
                assert!(limit.is_none());
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_chart_filter_and_global_db() {
        let args = Args::try_parse_from([
            "playchart",
            "chart",
            "--filter",
            "this-month",
            "--db",
            "/tmp/test.db",
        ])
        .unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/tmp/test.db")));
        assert!(matches!(
            args.command,
            Command::Chart {
                filter: TimeFilter::ThisMonth,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        assert!(Args::try_parse_from(["playchart", "chart", "--filter", "today"]).is_err());
    }
}
