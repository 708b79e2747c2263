//! Headless subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

use arbor_core::{
    AddRequest, Config, Engine, RemoveRequest, RenameRequest, Snapshot, WorktreeRecord,
};

use crate::ui::status_markers;

/// Subcommands that run once and exit instead of opening the TUI.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List worktrees
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Create a worktree for a branch
    Add {
        /// Branch to check out (or create with --create)
        branch: String,
        /// Target directory (default: <worktree dir>/<repo>/<branch>)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Create the branch
        #[arg(short = 'b', long)]
        create: bool,
        /// Start point for a created branch
        #[arg(long, requires = "create")]
        base: Option<String>,
    },
    /// Remove a worktree
    Remove {
        /// Worktree directory
        path: PathBuf,
        /// Discard uncommitted changes
        #[arg(short, long)]
        force: bool,
    },
    /// Rename a worktree directory (and its branch, if configured)
    Rename {
        /// Worktree directory
        path: PathBuf,
        /// New directory name
        new_name: String,
    },
}

/// One row of `list --json`.
#[derive(Debug, Serialize)]
struct ListRow<'a> {
    name: String,
    path: &'a Path,
    branch: Option<&'a str>,
    head: &'a str,
    is_main: bool,
    is_active: bool,
    is_dirty: bool,
    ahead: u32,
    behind: u32,
    staged: u32,
    modified: u32,
    untracked: u32,
    warning: Option<&'a str>,
}

impl<'a> From<&'a WorktreeRecord> for ListRow<'a> {
    fn from(record: &'a WorktreeRecord) -> Self {
        Self {
            name: record.name(),
            path: &record.path,
            branch: record.branch.name(),
            head: &record.head,
            is_main: record.is_main,
            is_active: record.is_active,
            is_dirty: record.is_dirty,
            ahead: record.status.ahead,
            behind: record.status.behind,
            staged: record.status.staged,
            modified: record.status.modified,
            untracked: record.status.untracked,
            warning: record.warning.as_deref(),
        }
    }
}

/// Execute a headless subcommand.
pub async fn run(engine: &Engine, config: &Config, command: Command) -> anyhow::Result<()> {
    let mut out = io::stdout();
    // Every command needs the current listing: names, the main worktree, locks.
    engine.reconcile().await?;

    match command {
        Command::List { json } => {
            let snapshot = engine.snapshot();
            if json {
                write_json(&mut out, &snapshot)?;
            } else {
                write_table(&mut out, &snapshot)?;
            }
        }
        Command::Add {
            branch,
            path,
            create,
            base,
        } => {
            let target_path = match path {
                Some(path) => absolute(&path)?,
                None => engine.default_target(&config.worktree_base_dir(), &branch),
            };
            let record = engine
                .request_add(AddRequest {
                    branch,
                    target_path: target_path.clone(),
                    create_branch: create,
                    base_ref: base,
                })
                .await??;
            match record {
                Some(record) => writeln!(
                    out,
                    "Created worktree {} ({}) at {}",
                    record.name(),
                    record.branch,
                    record.path.display()
                )?,
                None => writeln!(out, "Created worktree at {}", target_path.display())?,
            }
        }
        Command::Remove { path, force } => {
            let path = absolute(&path)?;
            engine
                .request_remove(RemoveRequest {
                    path: path.clone(),
                    force,
                })
                .await??;
            writeln!(out, "Removed worktree {}", path.display())?;
        }
        Command::Rename { path, new_name } => {
            let record = engine
                .request_rename(RenameRequest {
                    path: absolute(&path)?,
                    new_name,
                })
                .await??;
            writeln!(
                out,
                "Renamed worktree to {} ({}) at {}",
                record.name(),
                record.branch,
                record.path.display()
            )?;
        }
    }
    Ok(())
}

/// Resolve a user-supplied path the way the registry keys worktrees.
fn absolute(path: &Path) -> io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(path) => Ok(path),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

fn write_json(out: &mut impl Write, snapshot: &Snapshot) -> anyhow::Result<()> {
    let rows: Vec<ListRow<'_>> = snapshot.iter().map(ListRow::from).collect();
    serde_json::to_writer_pretty(&mut *out, &rows)?;
    writeln!(out)?;
    Ok(())
}

fn write_table(out: &mut impl Write, snapshot: &Snapshot) -> io::Result<()> {
    if snapshot.is_empty() {
        return writeln!(out, "No worktrees found.");
    }
    writeln!(
        out,
        "{:<1} {:<24}  {:<24}  {:<8}  PATH",
        "", "NAME", "BRANCH", "STATUS"
    )?;
    for record in snapshot.iter() {
        let tag = if record.is_main {
            "M"
        } else if record.is_active {
            ">"
        } else {
            " "
        };
        writeln!(
            out,
            "{tag:<1} {:<24}  {:<24}  {:<8}  {}",
            truncate(&record.name(), 24),
            truncate(&record.branch.to_string(), 24),
            status_markers(record),
            record.path.display()
        )?;
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max - 1).collect::<String>())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arbor_core::BranchRef;

    fn snapshot() -> Snapshot {
        let main = WorktreeRecord {
            is_main: true,
            head: "abc123".into(),
            ..WorktreeRecord::new("/src/repo", BranchRef::Named("main".into()))
        };
        let detached = WorktreeRecord {
            is_dirty: true,
            warning: Some("status failed".into()),
            ..WorktreeRecord::new("/wt/repo/scratch", BranchRef::Detached)
        };
        Snapshot {
            generation: 1,
            records: vec![main, detached],
        }
    }

    #[test]
    fn truncate_short_string() {
        assert_eq!(truncate("feature", 10), "feature");
    }

    #[test]
    fn truncate_long_string() {
        assert_eq!(truncate("feature/very-long-name", 8), "feature…");
    }

    #[test]
    fn table_lists_every_worktree() {
        let mut out = Vec::new();
        write_table(&mut out, &snapshot()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("NAME"));
        assert!(lines[1].starts_with('M'));
        assert!(lines[1].contains("/src/repo"));
        assert!(lines[2].contains("(detached)"));
        assert!(lines[2].contains("* !"));
    }

    #[test]
    fn table_reports_empty_list() {
        let mut out = Vec::new();
        write_table(&mut out, &Snapshot::default()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No worktrees found.\n");
    }

    #[test]
    fn json_rows_are_flat() {
        let mut out = Vec::new();
        write_json(&mut out, &snapshot()).unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(rows[0]["name"], "repo");
        assert_eq!(rows[0]["branch"], "main");
        assert_eq!(rows[0]["is_main"], true);
        assert_eq!(rows[1]["branch"], serde_json::Value::Null);
        assert_eq!(rows[1]["warning"], "status failed");
    }

    #[test]
    fn absolute_joins_relative_missing_paths() {
        let path = absolute(Path::new("does-not-exist-here")).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("does-not-exist-here"));
    }
}
