use std::fmt;
use std::fs;
use std::io;

use clap::Parser;
use tracing::{Level, debug, info, warn};

use super::data_io::{list_snapshots, write_atomic, write_report};
use super::describe::{DescriptionSource, LiveDescriptions, LookupSource};
use super::error::{FillError, Result};
use super::extract::Extractor;
use super::fetch::{CachedFetcher, HttpTransport, PageTransport};
use super::harvest::harvest_identifiers;
use super::rewrite::Rewriter;
use super::types::{Cli, RunConfig};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: usize,
    pub rewritten: usize,
    pub identifiers: usize,
    pub cached: usize,
    pub downloaded: usize,
    pub unavailable: usize,
    pub empty: usize,
    pub cards_injected: usize,
    pub panels_filled: usize,
    pub skips: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "documents={} rewritten={} identifiers={} cached={} downloaded={} unavailable={} empty={} cards={} panels={} skips={}",
            self.documents,
            self.rewritten,
            self.identifiers,
            self.cached,
            self.downloaded,
            self.unavailable,
            self.empty,
            self.cards_injected,
            self.panels_filled,
            self.skips.len()
        )
    }
}

pub async fn run() -> Result<RunSummary> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = RunConfig::from_cli(&cli)?;
    let transport = HttpTransport::new(
        &config.user_agent,
        &config.profile.accept_language,
        config.timeout,
    )?;
    let summary = run_pipeline(&config, transport).await?;

    if let Some((path, _)) = &config.report {
        eprintln!("finished run: {summary} report={path}");
    } else {
        eprintln!("finished run: {summary}");
    }
    Ok(summary)
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Harvest, bulk prefetch, then rewrite every snapshot in filename order.
pub async fn run_pipeline<T: PageTransport>(config: &RunConfig, transport: T) -> Result<RunSummary> {
    config.profile.validate()?;

    let snapshots = list_snapshots(&config.data_dir, &config.prefix, &config.extension)?;
    if snapshots.is_empty() {
        warn!(
            dir = %config.data_dir.display(),
            prefix = %config.prefix,
            "no listing snapshots found"
        );
    }
    let ids = harvest_identifiers(&snapshots, &config.profile.link_marker)?;

    let fetcher = CachedFetcher::new(transport, &config.cache_dir, config.base_url.clone())?;
    let extractor = Extractor::new(&config.profile.heuristic)?;
    let mut descriptions = LiveDescriptions::new(fetcher, extractor, config.delay);

    let batch = match config.fetch_limit {
        Some(limit) => &ids[..ids.len().min(limit)],
        None => &ids[..],
    };
    info!(
        batch = batch.len(),
        total = ids.len(),
        "fetching and extracting descriptions"
    );
    for (index, id) in batch.iter().enumerate() {
        info!("[{}/{}] processing {id}", index + 1, batch.len());
        descriptions.describe(id).await?;
    }

    let rewriter = Rewriter::new(&config.profile, config.mode);
    let mut summary = RunSummary {
        documents: snapshots.len(),
        identifiers: ids.len(),
        ..RunSummary::default()
    };

    for path in &snapshots {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(file = %name, "rewriting snapshot");

        let original = fs::read_to_string(path).map_err(FillError::at(path))?;
        let out = rewriter.rewrite(&original, &mut descriptions).await?;
        summary.cards_injected += out.cards_injected;
        summary.panels_filled += usize::from(out.panel_filled);
        summary
            .skips
            .extend(out.skips.into_iter().map(|skip| format!("{name}: {skip}")));

        if out.html == original {
            debug!(file = %name, "unchanged, not rewritten");
            continue;
        }
        write_atomic(path, out.html.as_bytes())?;
        summary.rewritten += 1;
    }

    for lookup in descriptions.lookups() {
        match &lookup.source {
            LookupSource::Cached => summary.cached += 1,
            LookupSource::Downloaded => summary.downloaded += 1,
            LookupSource::Unavailable(reason) => {
                summary.unavailable += 1;
                summary.skips.push(format!("{}: {reason}", lookup.identifier));
                continue;
            }
        }
        if lookup.description_chars == 0 {
            summary.empty += 1;
            summary
                .skips
                .push(format!("{}: no description found", lookup.identifier));
        }
    }

    if let Some((path, format)) = &config.report {
        write_report(path, *format, descriptions.lookups())?;
        info!(report = %path, records = descriptions.lookups().len(), "report written");
    }

    Ok(summary)
}
