//! Arbor CLI Library
//!
//! Terminal interface for the arbor worktree engine.
//! Provides both TUI (ratatui) and headless modes.

pub mod app;
pub mod commands;
pub mod tui;
pub mod ui;
