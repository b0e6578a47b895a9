//! CLI commands.

pub mod download;
