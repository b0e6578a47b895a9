//! Terminal interaction: prompts and progress rendering.

pub mod progress;
pub mod prompt;

pub use progress::{LineProgress, TerminalProgress};
