use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use listing_harvest::config::HarvestConfig;
use listing_harvest::export::export_csv;
use listing_harvest::harvest::Harvester;
use listing_harvest::media::{default_media_dir, harvest_media, HttpMediaSource};
use listing_harvest::pages::{load_links, PageScraper};
use listing_harvest::scrapers::{BrowserFetcher, HttpFetcher, PageFetcher};
use listing_harvest::search_api::collect_links;
use listing_harvest::store::JsonFileStore;
use listing_harvest::throttle::Throttle;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "listing-harvest", version, about = "Incremental listing scraper")]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(long, global = true, env = "LISTING_HARVEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Walk listing pages, then fill in detail fields for incomplete records
    Crawl {
        /// Records file (overrides output.records)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Fetch at most this many detail pages in this run
        #[arg(long)]
        max_details: Option<usize>,
        /// Render pages with headless Chrome instead of plain HTTP
        #[arg(long, default_value_t = false)]
        browser: bool,
    },
    /// Download every image referenced by a records file
    Media {
        #[arg(long)]
        input: PathBuf,
        /// Destination directory (default: <input dir>/photo/YYYY/MM)
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Merge record files into one CSV sheet
    ExportCsv {
        #[arg(long)]
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Collect detail-page links from the search API
    Links {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Scrape single pages into one JSON file each
    Pages {
        #[arg(long, conflicts_with = "batch")]
        url: Option<String>,
        /// JSON array of URLs
        #[arg(long)]
        batch: Option<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        browser: bool,
    },
}

fn page_fetcher(config: &HarvestConfig, browser: bool) -> Result<Box<dyn PageFetcher>> {
    let fetcher: Box<dyn PageFetcher> = if browser {
        Box::new(
            BrowserFetcher::new(config.browser.clone()).context("Failed to start headless Chrome")?,
        )
    } else {
        Box::new(HttpFetcher::new(&config.http).context("Failed to build HTTP client")?)
    };
    info!("Using {} fetcher", fetcher.source_name());
    Ok(fetcher)
}

async fn crawl(
    config: HarvestConfig,
    output: Option<PathBuf>,
    max_details: Option<usize>,
    browser: bool,
) -> Result<()> {
    let records_path = output.unwrap_or_else(|| config.output.records.clone());
    let mut store = JsonFileStore::open(&records_path, config.site.id_field.clone())
        .with_context(|| format!("Failed to open store {}", records_path.display()))?
        .with_flush_every(config.output.flush_every);
    info!("📂 Loaded {} existing records", store.len());

    let fetcher = page_fetcher(&config, browser)?;
    let harvester = Harvester::new(fetcher, config.site, &config.throttle)?
        .with_max_details(max_details);

    let summary = harvester.run(&mut store).await?;
    info!(
        "✅ {} records total: {} new, {} details updated, {} failed",
        summary.total_records, summary.new_records, summary.details_updated, summary.details_failed
    );
    Ok(())
}

async fn media(
    mut config: HarvestConfig,
    input: PathBuf,
    dest: Option<PathBuf>,
    concurrency: Option<usize>,
) -> Result<()> {
    if let Some(n) = concurrency {
        if n == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.media.concurrency = n;
    }
    let dest = dest.unwrap_or_else(|| default_media_dir(&input));
    info!("🖼️  Downloading media for {} into {}", input.display(), dest.display());

    let source = HttpMediaSource::new(&config.http).context("Failed to build HTTP client")?;
    let report = harvest_media(&input, &dest, &config.media, &config.site.id_field, source)
        .await
        .with_context(|| format!("Media pass failed for {}", input.display()))?;

    info!(
        "✅ {} unique URLs, {} downloaded, {} failed",
        report.unique_urls,
        report.downloaded,
        report.failed.len()
    );
    Ok(())
}

async fn pages(
    config: HarvestConfig,
    url: Option<String>,
    batch: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    browser: bool,
) -> Result<()> {
    let out_dir = out_dir.unwrap_or_else(|| config.output.pages_dir.clone());
    let extractor = config.site.detail.compile()?;
    let fetcher = page_fetcher(&config, browser)?;
    let scraper = PageScraper::new(
        fetcher.as_ref(),
        &extractor,
        &out_dir,
        config.output.page_prefix.clone(),
    );

    match (url, batch) {
        (Some(url), _) => {
            let path = scraper.scrape(&url).await?;
            info!("💾 Saved {}", path.display());
        }
        (None, Some(batch)) => {
            let urls = load_links(&batch)
                .with_context(|| format!("Failed to read links from {}", batch.display()))?;
            let throttle = Throttle::new(config.throttle.batch, config.throttle.backoff);
            let summary = scraper.scrape_all(&urls, &throttle).await;
            info!(
                "✅ Saved {} pages to {}, {} failed",
                summary.written.len(),
                out_dir.display(),
                summary.failed.len()
            );
        }
        (None, None) => bail!("pass either --url or --batch"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = HarvestConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    info!("🏠 Listing Harvest - {}", config.site.name);

    match cli.command {
        Commands::Crawl {
            output,
            max_details,
            browser,
        } => crawl(config, output, max_details, browser).await?,
        Commands::Media {
            input,
            dest,
            concurrency,
        } => media(config, input, dest, concurrency).await?,
        Commands::ExportCsv { output, inputs } => {
            match export_csv(&inputs, &output)
                .with_context(|| format!("Failed to write {}", output.display()))?
            {
                Some(columns) => info!("💾 Saved {} ({} columns)", output.display(), columns),
                None => warn!("Nothing to export"),
            }
        }
        Commands::Links { output } => {
            let output = output.unwrap_or_else(|| config.output.links.clone());
            let links = collect_links(&config.search_api, &config.http, &output).await?;
            info!("🔗 Collected {} links", links.len());
        }
        Commands::Pages {
            url,
            batch,
            out_dir,
            browser,
        } => pages(config, url, batch, out_dir, browser).await?,
    }

    Ok(())
}
