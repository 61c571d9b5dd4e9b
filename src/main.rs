//! Tidecrawl main entry point
//!
//! This is the command-line interface for the Tidecrawl crawl orchestrator.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tidecrawl::config::{load_settings_with_hash, Settings};
use tidecrawl::output::write_markdown_report;
use tidecrawl::{Crawler, ExtractionStrategy, JobSnapshot, OutputFormat, PageResult};
use tracing_subscriber::EnvFilter;

/// Tidecrawl: scrape pages, crawl sites, and process batches of URLs
#[derive(Parser, Debug)]
#[command(name = "tidecrawl")]
#[command(version)]
#[command(about = "Crawl and scrape orchestration", long_about = None)]
struct Cli {
    /// Path to TOML settings file
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a single page
    Scrape {
        url: String,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Crawl breadth-first from a start URL
    Crawl {
        url: String,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long)]
        max_depth: Option<u32>,

        #[arg(long)]
        max_pages: Option<u32>,

        /// Seconds before dispatch stops
        #[arg(long)]
        max_duration: Option<u64>,

        /// Simultaneous fetches
        #[arg(long)]
        concurrency: Option<usize>,

        /// Seconds each slot waits between fetches
        #[arg(long)]
        delay: Option<f64>,

        /// Ignore robots.txt
        #[arg(long)]
        no_robots: bool,

        /// Follow links to other domains
        #[arg(long)]
        allow_external: bool,

        /// Regex a URL must match (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Regex that excludes a URL (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Write a markdown report to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Fetch every URL listed in a file, one per line
    Batch {
        file: PathBuf,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        delay: Option<f64>,

        /// Stop at the first failed fetch
        #[arg(long)]
        fail_fast: bool,
    },

    /// Show the status of a persisted crawl job
    Status {
        job_id: Option<String>,
    },

    /// Print the page results of a persisted crawl job as JSON
    Results {
        job_id: String,
    },

    /// List persisted browser sessions
    Sessions,

    /// Delete old finished jobs and expired cache entries
    Cleanup {
        /// Remove jobs finished more than this many hours ago
        #[arg(long, value_name = "HOURS")]
        older_than: Option<u64>,
    },

    /// Print job counts by status
    Stats,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Output format: markdown, json, html or text
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Per-fetch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Bind fetches to this session
    #[arg(long)]
    session: Option<String>,

    /// CSS extraction as NAME=SELECTOR (repeatable)
    #[arg(long = "select", value_name = "NAME=SELECTOR")]
    selectors: Vec<String>,
}

impl FetchArgs {
    fn extraction(&self) -> Result<ExtractionStrategy> {
        if self.selectors.is_empty() {
            return Ok(ExtractionStrategy::None);
        }
        let mut pairs = Vec::with_capacity(self.selectors.len());
        for raw in &self.selectors {
            let (name, selector) = raw
                .split_once('=')
                .with_context(|| format!("expected NAME=SELECTOR, got '{}'", raw))?;
            pairs.push((name.trim().to_string(), selector.trim().to_string()));
        }
        Ok(ExtractionStrategy::css(pairs)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let settings = load_cli_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Scrape { url, fetch } => handle_scrape(settings, &url, &fetch).await,
        Command::Crawl {
            url,
            fetch,
            max_depth,
            max_pages,
            max_duration,
            concurrency,
            delay,
            no_robots,
            allow_external,
            include,
            exclude,
            report,
        } => {
            let mut rule = settings.crawl.clone();
            if let Some(v) = max_depth {
                rule.max_depth = v;
            }
            if let Some(v) = max_pages {
                rule.max_pages = v;
            }
            if let Some(v) = max_duration {
                rule.max_duration = v;
            }
            if let Some(v) = concurrency {
                rule.concurrent_requests = v;
            }
            if let Some(v) = delay {
                rule.delay = v;
            }
            if no_robots {
                rule.respect_robots = false;
            }
            if allow_external {
                rule.allow_external_links = true;
            }
            rule.include_patterns.extend(include);
            rule.exclude_patterns.extend(exclude);

            handle_crawl(settings, &url, rule, &fetch, report.as_deref()).await
        }
        Command::Batch {
            file,
            fetch,
            concurrency,
            delay,
            fail_fast,
        } => handle_batch(settings, &file, &fetch, concurrency, delay, fail_fast).await,
        Command::Status { job_id } => handle_status(settings, job_id.as_deref()),
        Command::Results { job_id } => handle_results(settings, &job_id),
        Command::Sessions => handle_sessions(settings),
        Command::Cleanup { older_than } => handle_cleanup(settings, older_than),
        Command::Stats => handle_stats(settings),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, overrides the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("tidecrawl=info,warn"),
                1 => EnvFilter::new("tidecrawl=debug,info"),
                2 => EnvFilter::new("tidecrawl=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_cli_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        tracing::debug!("No settings file given, using defaults");
        return Ok(Settings::default());
    };

    tracing::info!("Loading settings from: {}", path.display());
    let (settings, hash) = load_settings_with_hash(path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    tracing::info!("Settings loaded successfully (hash: {})", hash);
    Ok(settings)
}

fn fetch_options(settings: &Settings, fetch: &FetchArgs) -> tidecrawl::FetchOptions {
    let mut options = settings.fetch_options();
    if let Some(timeout) = fetch.timeout {
        options.timeout = timeout;
    }
    options
}

async fn handle_scrape(settings: Settings, url: &str, fetch: &FetchArgs) -> Result<()> {
    let options = fetch_options(&settings, fetch);
    let format = fetch.format.unwrap_or(settings.scrape.output_format);
    let extraction = fetch.extraction()?;
    let crawler = Crawler::from_settings(settings)?;

    let result = crawler
        .scrape_single(url, &options, &extraction, format, fetch.session.as_deref())
        .await?;

    if !result.success {
        let message = result
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        bail!("scrape of {} failed: {}", result.url, message);
    }

    if let Some(content) = &result.content {
        println!("{}", content);
    }
    if let Some(extracted) = &result.extracted {
        println!("{}", serde_json::to_string_pretty(extracted)?);
    }
    Ok(())
}

async fn handle_crawl(
    settings: Settings,
    url: &str,
    rule: tidecrawl::CrawlRule,
    fetch: &FetchArgs,
    report: Option<&Path>,
) -> Result<()> {
    let options = fetch_options(&settings, fetch);
    let format = fetch.format.unwrap_or(settings.scrape.output_format);
    let sweep_every = Duration::from_secs(settings.storage.session_cleanup_interval);
    let crawler = Crawler::from_settings(settings)?;
    let sweeper = crawler.spawn_session_sweeper(sweep_every);

    let mut request = crawler
        .crawl_request(url)
        .with_rule(rule)
        .with_options(options)
        .with_extraction(fetch.extraction()?)
        .with_output_format(format);
    if let Some(session) = &fetch.session {
        request = request.with_session(session.clone());
    }

    let job_id = crawler.start_crawl_async(request)?;
    tracing::info!("Crawl job {} submitted", job_id);

    let snapshot = tokio::select! {
        snapshot = crawler.wait_for_crawl(&job_id) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, letting in-flight fetches finish");
            crawler.cancel_crawl(&job_id);
            crawler.wait_for_crawl(&job_id).await
        }
    };
    sweeper.abort();

    let snapshot = snapshot.with_context(|| format!("job {} disappeared", job_id))?;
    print_snapshot(&snapshot);

    if let Some(path) = report {
        let results = crawler.get_crawl_results(&job_id);
        write_markdown_report(&snapshot, &results, path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("✓ Report written to: {}", path.display());
    }
    Ok(())
}

async fn handle_batch(
    settings: Settings,
    file: &Path,
    fetch: &FetchArgs,
    concurrency: Option<usize>,
    delay: Option<f64>,
    fail_fast: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    let options = fetch_options(&settings, fetch);
    let format = fetch.format.unwrap_or(settings.scrape.output_format);
    let crawler = Crawler::from_settings(settings)?;

    let mut request = crawler
        .batch_request()
        .with_options(options)
        .with_extraction(fetch.extraction()?)
        .with_output_format(format);
    if let Some(v) = concurrency {
        request = request.with_concurrency(v);
    }
    if let Some(v) = delay {
        request = request.with_delay(v);
    }
    if fail_fast {
        request = request.with_continue_on_error(false);
    }
    if let Some(session) = &fetch.session {
        request = request.with_session(session.clone());
    }

    let results = crawler.scrape_batch(&urls, request).await?;
    print_results(&results)?;
    Ok(())
}

fn handle_status(settings: Settings, job_id: Option<&str>) -> Result<()> {
    let crawler = persistent_crawler(settings)?;
    match job_id {
        Some(id) => {
            let snapshot = crawler
                .get_crawl_status(id)
                .with_context(|| format!("no job with id {}", id))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => {
            for snapshot in crawler.list_jobs() {
                println!(
                    "{}  {:<9}  {:>5} pages  {}",
                    snapshot.id,
                    snapshot.status.to_string(),
                    snapshot.counters.pages_crawled,
                    snapshot.start_url
                );
            }
        }
    }
    Ok(())
}

fn handle_cleanup(settings: Settings, older_than_hours: Option<u64>) -> Result<()> {
    let crawler = persistent_crawler(settings)?;
    let older_than = older_than_hours.map(|h| chrono::Duration::hours(h.min(1_000_000) as i64));
    let jobs = crawler.cleanup_completed_jobs(older_than);
    let cached = crawler.cleanup_expired_cache();
    println!("✓ Removed {} jobs and {} cache entries", jobs, cached);
    Ok(())
}

fn handle_stats(settings: Settings) -> Result<()> {
    let crawler = persistent_crawler(settings)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&crawler.get_job_statistics())?
    );
    Ok(())
}

fn handle_results(settings: Settings, job_id: &str) -> Result<()> {
    let crawler = persistent_crawler(settings)?;
    if crawler.get_crawl_status(job_id).is_none() {
        bail!("no job with id {}", job_id);
    }
    print_results(&crawler.get_crawl_results(job_id))
}

fn handle_sessions(settings: Settings) -> Result<()> {
    let crawler = persistent_crawler(settings)?;
    for session in crawler.stored_sessions()? {
        println!(
            "{}  {:?}  {} pages  last used {}",
            session.id,
            session.config.browser_type,
            session.page_count,
            session.last_accessed.to_rfc3339()
        );
    }
    Ok(())
}

fn persistent_crawler(settings: Settings) -> Result<Crawler> {
    if settings.storage.database_path.is_none() {
        bail!("this command needs [storage] database-path in the settings file");
    }
    Ok(Crawler::from_settings(settings)?)
}

fn print_snapshot(snapshot: &JobSnapshot) {
    let counters = &snapshot.counters;
    println!("=== Crawl {} ===\n", snapshot.id);
    println!("  Status:          {}", snapshot.status);
    println!("  Pages crawled:   {}", counters.pages_crawled);
    println!("  Successful:      {}", counters.pages_successful);
    println!("  Failed:          {}", counters.pages_failed);
    println!("  URLs discovered: {}", counters.urls_discovered);
    println!("  URLs rejected:   {}", counters.urls_rejected);
    println!("  Deepest level:   {}", counters.current_depth);
    println!("  Elapsed:         {:.2}s", snapshot.elapsed_seconds);
    if let Some(error) = &snapshot.error {
        println!("  Error:           {}", error);
    }
}

fn print_results(results: &[PageResult]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(results)?);
    Ok(())
}
