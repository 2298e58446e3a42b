use anyhow::Context;
use clap::Parser;
use shelfwalk::{
    pipeline::{Pipeline, RunContext},
    ScraperConfig,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Crawls a catalog site's categories and writes every product to CSV.
#[derive(Debug, Parser)]
#[command(name = "shelfwalk", version, about)]
struct Cli {
    /// Stop after this many products.
    #[arg(long)]
    limit: Option<usize>,

    /// Output CSV path (default: products_<timestamp>.csv).
    #[arg(long)]
    output: Option<String>,

    /// Render every page in a headless browser.
    #[arg(long)]
    use_browser_backend: bool,

    /// Pagination safety cap per category.
    #[arg(long)]
    max_pages: Option<u32>,

    /// Configuration file (default: ./shelfwalk.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

/// The main entry point of the application.
///
/// Exits non-zero only when the run cannot start: bad configuration or an
/// unreachable root page. Failed pages and categories are logged and skipped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ScraperConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.limit.is_some() {
        config.limit = cli.limit;
    }
    if cli.output.is_some() {
        config.output_path = cli.output;
    }
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = max_pages;
    }

    let start_time = Instant::now();
    let ctx = RunContext::new(config, cli.use_browser_backend).context("setting up the run")?;
    let pipeline = Pipeline::new(ctx);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let summary = match pipeline.run(shutdown).await {
        Ok(summary) => summary,
        Err(e) if e.is_fatal() => return Err(e).context("run could not start"),
        Err(e) => return Err(e).context("writing output failed"),
    };

    info!(
        categories = summary.categories,
        pages = summary.pages,
        records = summary.records,
        failed_categories = summary.failed_categories,
        detail_failures = summary.detail_failures,
        interrupted = summary.interrupted,
        elapsed = ?start_time.elapsed(),
        "Run finished"
    );
    println!("\n=== Scrape Summary ===");
    println!("Categories: {}", summary.categories);
    println!("Pages fetched: {}", summary.pages);
    println!("Products written: {}", summary.records);
    for (category, count) in &summary.per_category {
        println!("  {}: {}", category, count);
    }
    println!("Output: {}", summary.output_path.display());
    println!("Processing time: {:.2?}", start_time.elapsed());
    if summary.interrupted {
        println!("Run was interrupted; output is partial.");
    }

    Ok(())
}
