//! Arbor CLI
//!
//! Terminal interface for browsing and managing the git worktrees of a
//! repository. Opens the TUI by default; subcommands run headless.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use arbor_cli::commands::{self, Command};
use arbor_cli::tui;
use arbor_core::Engine;
use arbor_core::config::load_config;
use arbor_core::tracing_init::{LogTarget, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(version, about = "Git worktree manager", long_about = None)]
struct Cli {
    /// Repository to manage (any directory inside it)
    #[arg(short, long, env = "ARBOR_REPO")]
    repo: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,

    /// Log file for TUI mode (overrides `debug_log` from settings)
    #[arg(long)]
    debug_log: Option<PathBuf>,

    /// Timeout for each git invocation, in seconds
    #[arg(long)]
    command_timeout_secs: Option<u64>,

    /// Auto-refresh period in seconds (0 disables periodic refresh)
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Do not watch the git directory for changes
    #[arg(long)]
    no_watch: bool,

    /// Start the TUI with this filter applied
    #[arg(long)]
    filter: Option<String>,

    /// Write the jumped-to worktree path to this file instead of stdout
    #[arg(long)]
    output_selection: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let repo = match cli.repo {
        Some(repo) => repo,
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(&repo))?;
    if let Some(secs) = cli.command_timeout_secs {
        config.git.command_timeout_secs = secs;
    }
    if let Some(secs) = cli.refresh_secs {
        config.refresh.auto_refresh = secs > 0;
        config.refresh.interval_secs = secs;
    }
    if cli.no_watch {
        config.refresh.watch_git_dir = false;
    }
    if cli.debug_log.is_some() {
        config.debug_log = cli.debug_log;
    }

    // The TUI owns the terminal, so it only logs to a file when asked to.
    let level = &config.log_level.0;
    let filter = format!("arbor_core={level},arbor_cli={level}");
    let target = match (&cli.command, config.debug_log.as_deref()) {
        (Some(_), _) => LogTarget::Stderr,
        (None, Some(path)) => LogTarget::File(path),
        (None, None) => LogTarget::Discard,
    };
    init_tracing(&filter, cli.log_json, target)?;

    info!(version = env!("CARGO_PKG_VERSION"), repo = %repo.display(), "Starting arbor");

    let engine = Engine::from_config(&config, &repo)?;
    match cli.command {
        Some(command) => commands::run(&engine, &config, command).await,
        None => {
            let selection = tui::run(&engine, &config, cli.filter.as_deref()).await?;
            report_selection(selection.as_deref(), cli.output_selection.as_deref())
        }
    }
}

/// Hand the jumped-to path to the caller, usually a shell wrapper that
/// `cd`s into it. With an output file, the file is always written, empty
/// when nothing was selected.
fn report_selection(selection: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(file) => {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let contents = selection
                .map(|path| format!("{}\n", path.display()))
                .unwrap_or_default();
            std::fs::write(file, contents)?;
        }
        None => {
            if let Some(path) = selection {
                writeln!(io::stdout().lock(), "{}", path.display())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn selection_file_is_written_with_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("state").join("selection");
        report_selection(Some(Path::new("/wt/repo/feature1")), Some(&file)).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "/wt/repo/feature1\n");

        report_selection(None, Some(&file)).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "");
    }
}
