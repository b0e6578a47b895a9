//! Download command - fetch a manifest and rebuild its files.

use std::path::PathBuf;
use std::sync::Arc;

use indicatif::HumanBytes;
use manifestdown::config::{self, ConfigFile, LengthPolicy, RunConfig};
use manifestdown::download::{ManifestDownloader, ProgressBoard, RunObserver, RunReport};
use manifestdown::provider::{HttpClient, JsonManifestDecoder, ManifestDecoder, ReqwestClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::ui::prompt::{ask_confirm, ask_text, strip_quotes};
use crate::ui::{LineProgress, TerminalProgress};

/// Arguments for the download command.
#[derive(Debug, Default)]
pub struct DownloadArgs {
    pub manifest: Option<String>,
    pub content: bool,
    pub cache: Option<bool>,
    pub output: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub retries: u32,
    pub length_policy: Option<LengthPolicy>,
    pub chunk_base_url: Option<String>,
    pub verify_checksums: Option<bool>,
    pub assume_yes: bool,
}

/// Whether a manifest location should be fetched over HTTP.
fn is_url(location: &str) -> bool {
    location.contains("://")
}

/// Settings that do not need a question, merged from flags, config file and defaults.
fn base_config(args: &DownloadArgs, file: &ConfigFile, content: bool, output: PathBuf) -> RunConfig {
    let chunk_base_url = args
        .chunk_base_url
        .clone()
        .or_else(|| file.chunk_base_url.clone())
        .unwrap_or_else(|| config::chunk_base_url(content));

    let mut run = RunConfig::new(output)
        .with_chunk_base_url(chunk_base_url)
        .with_length_policy(args.length_policy.or(file.length_policy).unwrap_or_default())
        .with_verify_checksums(args.verify_checksums.or(file.verify_checksums).unwrap_or(true));

    if let Some(concurrency) = args.concurrency.or(file.concurrency) {
        run = run.with_concurrency(concurrency);
    }
    run
}

/// Cache directory for an enabled cache, from the config file or the default.
fn cache_dir(file: &ConfigFile) -> Option<PathBuf> {
    file.cache_dir.clone().or_else(config::default_cache_dir)
}

async fn fetch_manifest(location: &str, client: &dyn HttpClient) -> Result<Vec<u8>, CliError> {
    let fetch_error = |reason: String| CliError::ManifestFetch {
        location: location.to_string(),
        reason,
    };

    if is_url(location) {
        client
            .get(location)
            .await
            .map(|body| body.to_vec())
            .map_err(|e| fetch_error(e.to_string()))
    } else {
        tokio::fs::read(location)
            .await
            .map_err(|e| fetch_error(e.to_string()))
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Finished!");
    println!(
        "  {} completed, {} failed, {} written",
        report.completed_count(),
        report.failed_count(),
        HumanBytes(report.bytes_written())
    );
    let warnings = report.warnings().count();
    if warnings > 0 {
        println!("  {} files completed with warnings", warnings);
    }
    if report.cancelled {
        println!("  Download was cancelled");
    }
}

/// Run the download command.
pub async fn run(args: DownloadArgs, file: &ConfigFile) -> Result<(), CliError> {
    let location = match &args.manifest {
        Some(location) => strip_quotes(location).to_string(),
        None => ask_text("Manifest path or URL", "--manifest")?,
    };

    let client = Arc::new(ReqwestClient::new()?);
    let raw = fetch_manifest(&location, client.as_ref()).await?;
    println!("Retrieved manifest ({} bytes)", raw.len());

    let content = args.content
        || (args.chunk_base_url.is_none()
            && file.chunk_base_url.is_none()
            && ask_confirm("Is this a content build?", false, args.assume_yes)?);

    let use_cache = match args.cache.or(file.cache) {
        Some(enabled) => enabled,
        None => ask_confirm("Cache downloaded chunks?", true, args.assume_yes)?,
    };

    let output = match args.output.clone().or_else(|| file.output_dir.clone()) {
        Some(dir) => dir,
        None => PathBuf::from(ask_text("Output folder", "--output")?),
    };

    let mut run_config = base_config(&args, file, content, output);
    if use_cache {
        match cache_dir(file) {
            Some(dir) => run_config = run_config.with_cache_dir(Some(dir)),
            None => warn!("No data directory available, chunk cache disabled"),
        }
    }

    let decoder = JsonManifestDecoder::new(Arc::clone(&client) as Arc<dyn HttpClient>);
    let manifest = decoder.decode(&raw, &run_config.manifest_options())?;

    println!();
    println!("App:     {}", manifest.app_name());
    println!("Version: {}", manifest.build_version());
    println!("Launch:  {}", manifest.launch_command());
    println!(
        "Files:   {} ({})",
        manifest.files().len(),
        HumanBytes(manifest.total_bytes())
    );
    println!("Output:  {}", run_config.output_root.display());
    match &run_config.cache_dir {
        Some(dir) => println!("Cache:   {}", dir.display()),
        None => println!("Cache:   disabled"),
    }
    println!();

    info!(
        location = %location,
        concurrency = run_config.concurrency,
        policy = %run_config.length_policy,
        "Starting download"
    );

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling download...");
        handler_token.cancel();
    })?;

    let downloader = ManifestDownloader::new(run_config).with_cancellation(token);
    let board = Arc::new(ProgressBoard::new());

    let terminal = console::Term::stderr().is_term();
    let observer: Arc<dyn RunObserver> = if terminal {
        Arc::new(TerminalProgress::new())
    } else {
        Arc::new(LineProgress)
    };
    let reporter = (!terminal).then(|| LineProgress::start_reporter(Arc::clone(&board)));

    let mut report = downloader
        .run_with_progress(&manifest, Arc::clone(&board), Arc::clone(&observer))
        .await?;

    for attempt in 1..=args.retries {
        if report.is_success() || report.cancelled {
            break;
        }
        println!(
            "Retrying {} failed files (attempt {}/{})",
            report.failed_count(),
            attempt,
            args.retries
        );
        report = downloader
            .retry_failed(&manifest, report, Arc::clone(&board), Arc::clone(&observer))
            .await?;
    }

    if let Some(reporter) = reporter {
        reporter.stop().await;
    }
    print_summary(&report);

    if report.cancelled {
        Err(CliError::Cancelled)
    } else if !report.is_success() {
        Err(CliError::Incomplete {
            failed: report.failed_count(),
            total: report.files.len(),
        })
    } else {
        Ok(())
    }
}
