//! Sumi-Mirror main entry point
//!
//! This is the command-line interface for the Sumi-Mirror website mirror.

use clap::Parser;
use std::path::PathBuf;
use sumi_mirror::config::{load_config, Config};
use sumi_mirror::crawler::{run_crawl, scrape, ScrapeOptions};
use sumi_mirror::download::{Downloader, DEFAULT_USER_AGENT};
use tracing_subscriber::EnvFilter;

/// Sumi-Mirror: a resumable website mirror
///
/// Sumi-Mirror downloads pages and their images from seed URLs, rewrites
/// image references to the local copies and records its progress so an
/// interrupted mirror picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-mirror")]
#[command(version = "1.0.0")]
#[command(about = "A resumable website mirror", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", required_unless_present = "scrape")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Process pages even if they are already done
    #[arg(long)]
    force: bool,

    /// Re-process every page, ignoring done and visited markers
    #[arg(long)]
    refresh: bool,

    /// Always download pages, ignoring saved HTML
    #[arg(long)]
    cache_bypass: bool,

    /// Validate config and show what would be mirrored without downloading
    #[arg(long, conflicts_with_all = ["stats", "scrape"])]
    dry_run: bool,

    /// Show statistics from the crawl state and exit
    #[arg(long, conflicts_with_all = ["dry_run", "scrape"])]
    stats: bool,

    /// Print the metadata of a single page as JSON and exit
    #[arg(long, value_name = "URL", conflicts_with_all = ["dry_run", "stats"])]
    scrape: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config(path) {
                Ok(config) => {
                    tracing::info!("Configuration loaded successfully");
                    Some(config)
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    // Handle different modes
    if let Some(url) = &cli.scrape {
        handle_scrape(url, config.as_ref()).await?;
    } else if let Some(config) = config {
        if cli.dry_run {
            handle_dry_run(&config)?;
        } else if cli.stats {
            handle_stats(&config)?;
        } else {
            handle_crawl(config, &cli).await?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_mirror=info,warn"),
            1 => EnvFilter::new("sumi_mirror=debug,info"),
            2 => EnvFilter::new("sumi_mirror=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be mirrored
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Mirror Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Crawler Configuration:");
    println!("  Output directory: {}", crawler.output_dir);
    println!("  State file: {}", crawler.state_file_name);
    if let Some(root) = &crawler.html_file_root {
        println!("  HTML file root: {}", root);
    }
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Follow links: {}", crawler.follow_links);
    println!("  Max download threads: {}", crawler.max_download_threads);
    println!("  Request timeout: {}ms", crawler.request_timeout);
    println!(
        "  Retries: {} attempts, {}ms apart",
        crawler.max_attempts, crawler.backoff_delay
    );
    println!("  Page delay: {}ms", crawler.page_delay);
    if let Some(user_agent) = &crawler.user_agent {
        println!("  User agent: {}", user_agent);
    }
    if let Some(proxy) = &crawler.html_proxy {
        println!("  HTML proxy: {}", proxy);
    }

    println!("\nLinks:");
    println!("  Selector: {}", config.links.selector);
    println!(
        "  Host filter: {}",
        config.links.filter_host.as_deref().unwrap_or("(page host)")
    );
    println!("  Blacklist: {:?}", config.links.blacklist);
    println!("  Filters: {:?}", config.links.filters);

    println!("\nImages:");
    println!("  Selector: {}", config.images.selector);
    println!("  Blacklist: {:?}", config.images.blacklist);
    println!("  Filters: {:?}", config.images.filters);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start mirroring with {} seed URLs",
        config.seeds.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the crawl state
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use std::path::Path;
    use sumi_mirror::output::{load_statistics, print_statistics};
    use sumi_mirror::storage::open_store;

    let store = open_store(
        Path::new(&config.crawler.output_dir),
        &config.crawler.state_file_name,
    );
    if let Some(path) = store.path() {
        println!("State file: {}\n", path.display());
    }

    let stats = load_statistics(&store);
    print_statistics(&stats);

    Ok(())
}

/// Handles the --scrape mode: prints the metadata of one page
async fn handle_scrape(
    url: &str,
    config: Option<&Config>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = ScrapeOptions {
        include_images: true,
        include_links: true,
        include_og: true,
        ..Default::default()
    };
    if let Some(config) = config {
        options.download = config.download_options();
        options.link_blacklist = config.links.blacklist.clone();
    }

    let user_agent = options
        .download
        .user_agent
        .as_deref()
        .unwrap_or(DEFAULT_USER_AGENT);
    let downloader = Downloader::with_user_agent(user_agent)?;

    let info = scrape(&downloader, url, &options, &[]).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    Ok(())
}

/// Handles the main mirror operation
async fn handle_crawl(config: Config, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = config.crawl_options();
    options.force = cli.force;
    options.refresh = cli.refresh;
    options.cache_bypass = cli.cache_bypass;
    options.verbose = cli.verbose > 0;

    if options.refresh {
        tracing::info!("Refreshing every page (ignoring previous state)");
    } else if options.force {
        tracing::info!("Forcing pages that are already done");
    } else {
        tracing::info!("Starting mirror (done pages are skipped)");
    }
    tracing::info!(
        "Seeds: {}, max depth: {}",
        config.seeds.len(),
        config.crawler.max_depth
    );

    // Run the crawler
    match run_crawl(&config, options).await {
        Ok(report) => {
            tracing::info!(
                "Mirror completed: {} pages ({} downloaded, {} cached), {} skipped, {} failed",
                report.processed,
                report.downloaded(),
                report.cached,
                report.skipped,
                report.failed.len()
            );
            for failed in &report.failed {
                tracing::warn!("  {}: {}", failed.url, failed.error);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Mirror failed: {}", e);
            Err(e.into())
        }
    }
}
