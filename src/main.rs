use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mobile_scout::models::{QueryId, SiteId, SubscriberId};
use mobile_scout::params::ad_detail_url;
use mobile_scout::scrapers::{BrowserFetcher, HttpFetcher, ListingExtractor, PageFetcher};
use mobile_scout::{
    Config, CrawlService, IngestEngine, LogNotifier, MemoryStore, NotificationQueue, PgStore, Store,
};

#[derive(Parser)]
#[command(name = "mobile-scout")]
#[command(about = "Crawl stored car-ad searches and track the ads they find")]
struct Cli {
    /// Postgres connection string; without one everything stays in memory
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Store a new search query from a search-result URL
    AddQuery {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// Recipient to notify about new ads (repeatable)
        #[arg(long = "subscriber")]
        subscribers: Vec<i64>,
    },

    /// Delete a query and the ads only it was tracking
    DeleteQuery { id: i64 },

    /// Crawl one query
    Crawl { id: i64 },

    /// Crawl every query
    CrawlAll,

    /// Refresh one ad from its detail page
    Renew { site_id: i64 },

    /// Refresh every stored ad
    RenewAll,

    /// Print the ads linked to a query
    ListAds { query_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    info!("🚗 mobile-scout");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("failed to connect to database")?;
            if matches!(cli.command, Commands::Migrate) {
                store.migrate().await.context("failed to run migrations")?;
                info!("✅ Migrations applied");
                return Ok(());
            }
            Arc::new(store)
        }
        None => {
            if matches!(cli.command, Commands::Migrate) {
                bail!("DATABASE_URL is required to run migrations");
            }
            warn!("DATABASE_URL not set, using an in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let http: Arc<dyn PageFetcher> = Arc::new(
        HttpFetcher::new(config.user_agents.clone(), config.http_timeout)
            .context("failed to build HTTP client")?,
    );
    let detail = match cli.command {
        Commands::Renew { .. } | Commands::RenewAll => detail_fetcher(&config, &http),
        _ => Arc::clone(&http),
    };

    let (notifications, dispatcher) = NotificationQueue::spawn(Arc::new(LogNotifier));
    let engine = IngestEngine::new(Arc::clone(&store), notifications, config.chunk_size);
    let service = Arc::new(CrawlService::new(
        store,
        http,
        detail,
        ListingExtractor::new(config.site_offset),
        engine,
    ));

    match cli.command {
        Commands::Migrate => unreachable!("handled before the service is built"),
        Commands::AddQuery {
            name,
            url,
            subscribers,
        } => {
            let query = service
                .create_query(&name, &url, subscribers.into_iter().map(SubscriberId))
                .await?;
            println!("{}", serde_json::to_string_pretty(&query)?);
        }
        Commands::DeleteQuery { id } => {
            let report = service.delete_query(QueryId(id)).await?;
            println!(
                "Deleted query {} and {} ads",
                report.query_id,
                report.removed_ads.len()
            );
        }
        Commands::Crawl { id } => {
            let report = service.crawl(QueryId(id)).await?;
            println!(
                "Query {}: {} pages, {} ads, {} new",
                report.query_id, report.pages, report.ads_seen, report.ingest.new_ads
            );
        }
        Commands::CrawlAll => {
            for (id, result) in service.crawl_all().await? {
                match result {
                    Ok(report) => println!(
                        "Query {id}: {} pages, {} ads, {} new",
                        report.pages, report.ads_seen, report.ingest.new_ads
                    ),
                    Err(err) => println!("Query {id}: failed: {err}"),
                }
            }
        }
        Commands::Renew { site_id } => match service.renew(SiteId(site_id)).await? {
            Some(ad) => println!("{}", serde_json::to_string_pretty(&ad)?),
            None => println!("Ad {site_id} left unchanged"),
        },
        Commands::RenewAll => {
            let report = service.renew_all().await?;
            println!(
                "Renewed {}, unchanged {}, failed {}",
                report.renewed, report.unchanged, report.failed
            );
        }
        Commands::ListAds { query_id } => {
            for ad in service.ads_for_query(QueryId(query_id)).await? {
                let price = ad.price.map_or_else(|| "-".to_string(), |p| p.to_string());
                let net = ad.price_net().map_or_else(|| "-".to_string(), |p| p.to_string());
                println!(
                    "{}  {}  {} (net {})  {}",
                    ad.site_id,
                    ad.name,
                    price,
                    net,
                    ad_detail_url(ad.site_id)
                );
            }
        }
    }

    // the dispatcher stops once the last queue handle is gone
    drop(service);
    dispatcher.await.context("notification dispatcher failed")?;

    Ok(())
}

/// Detail pages render prices with scripts, so prefer the browser
fn detail_fetcher(config: &Config, http: &Arc<dyn PageFetcher>) -> Arc<dyn PageFetcher> {
    if !config.browser_enabled {
        return Arc::clone(http);
    }
    match BrowserFetcher::launch(config.user_agents.clone(), config.browser_settle) {
        Ok(browser) => Arc::new(browser),
        Err(err) => {
            warn!(error = %err, "Headless Chrome unavailable, falling back to plain HTTP");
            Arc::clone(http)
        }
    }
}
