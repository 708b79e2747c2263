//! TUI rendering components.

mod render;
#[cfg(test)]
mod render_tests;

pub use render::{draw, status_markers};
