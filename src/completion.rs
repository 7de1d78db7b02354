//! # Shell Completion Module
//!
//! Completion scripts for the supported shells, generated by clap_complete,
//! plus the hidden `complete-filters` helper that lists chart windows for
//! custom completion setups.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! playchart completion bash > ~/.local/share/bash-completion/completions/playchart
//!
//! # Generate zsh completions
//! playchart completion zsh > ~/.config/zsh/completions/_playchart
//! ```

use crate::aggregation::TimeFilter;
use clap::{Command, ValueEnum};
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Values accepted by `chart --filter`, as typed on the command line.
pub fn filter_completions() -> Vec<String> {
    TimeFilter::value_variants()
        .iter()
        .filter_map(ValueEnum::to_possible_value)
        .map(|value| value.get_name().to_string())
        .collect()
}

/// Print chart filters, one per line.
pub fn print_filter_completions() {
    for filter in filter_completions() {
        println!("{filter}");
    }
}
