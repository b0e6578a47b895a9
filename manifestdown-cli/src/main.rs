//! ManifestDown CLI - rebuild application files from a chunk manifest

mod commands;
mod error;
mod ui;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use manifestdown::config::{ConfigFile, LengthPolicy};
use manifestdown::logging::{init_logging, LoggingConfig};

use crate::commands::download::DownloadArgs;
use crate::error::CliError;

/// Length mismatch policy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum LengthPolicyArg {
    /// Fail files whose stream length differs from the manifest
    Strict,
    /// Keep such files and print a warning
    Warn,
}

impl From<LengthPolicyArg> for LengthPolicy {
    fn from(arg: LengthPolicyArg) -> Self {
        match arg {
            LengthPolicyArg::Strict => LengthPolicy::Strict,
            LengthPolicyArg::Warn => LengthPolicy::Warn,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "manifestdown",
    version,
    about = "Rebuild application files from a chunked content manifest"
)]
struct Cli {
    /// Manifest file path or URL (prompted when omitted)
    #[arg(short, long)]
    manifest: Option<String>,

    /// The manifest describes a content build
    #[arg(long)]
    content: bool,

    /// Cache downloaded chunks on disk
    #[arg(long, overrides_with = "no_cache")]
    cache: bool,

    /// Do not cache downloaded chunks
    #[arg(long, overrides_with = "cache")]
    no_cache: bool,

    /// Output directory (prompted when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of files downloaded at once [default: CPU count]
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Retry failed files this many times
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// How to treat files whose length differs from the manifest
    #[arg(long, value_enum)]
    length_policy: Option<LengthPolicyArg>,

    /// Override the chunk base URL
    #[arg(long)]
    chunk_base_url: Option<String>,

    /// Skip checksum verification
    #[arg(long)]
    no_verify: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Accept defaults instead of asking questions
    #[arg(short = 'y', long)]
    yes: bool,
}

impl Cli {
    fn cache_flag(&self) -> Option<bool> {
        if self.cache {
            Some(true)
        } else if self.no_cache {
            Some(false)
        } else {
            None
        }
    }

    fn log_level(&self, config: &ConfigFile) -> String {
        match self.verbose {
            0 => config.log_level.clone().unwrap_or_else(|| "warn".to_string()),
            1 => "info".to_string(),
            _ => "debug".to_string(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = ConfigFile::load()?;

    let logging = LoggingConfig::default()
        .with_level(cli.log_level(&config))
        .with_file(cli.log_file.clone().or_else(|| config.log_file.clone()));
    let _log_guard = init_logging(&logging)?;

    let args = DownloadArgs {
        manifest: cli.manifest.clone(),
        content: cli.content,
        cache: cli.cache_flag(),
        output: cli.output.clone(),
        concurrency: cli.concurrency,
        retries: cli.retries,
        length_policy: cli.length_policy.map(LengthPolicy::from),
        chunk_base_url: cli.chunk_base_url.clone(),
        verify_checksums: if cli.no_verify { Some(false) } else { None },
        assume_yes: cli.yes,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(commands::download::run(args, &config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "manifestdown",
            "--manifest",
            "build.json",
            "--content",
            "--no-cache",
            "-j",
            "3",
            "--length-policy",
            "warn",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.manifest.as_deref(), Some("build.json"));
        assert!(cli.content);
        assert_eq!(cli.cache_flag(), Some(false));
        assert_eq!(cli.concurrency, Some(3));
        assert_eq!(cli.length_policy, Some(LengthPolicyArg::Warn));
        assert_eq!(cli.log_level(&ConfigFile::default()), "debug");
    }

    #[test]
    fn test_cache_flags_last_wins() {
        let cli = Cli::try_parse_from(["manifestdown", "--no-cache", "--cache"]).unwrap();
        assert_eq!(cli.cache_flag(), Some(true));

        let cli = Cli::try_parse_from(["manifestdown"]).unwrap();
        assert_eq!(cli.cache_flag(), None);
    }

    #[test]
    fn test_log_level_from_config() {
        let cli = Cli::try_parse_from(["manifestdown"]).unwrap();
        let config = ConfigFile {
            log_level: Some("info".to_string()),
            ..ConfigFile::default()
        };
        assert_eq!(cli.log_level(&config), "info");
    }
}
