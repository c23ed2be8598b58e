//! Scheduler-facing operations: query management, crawling and detail
//! renewal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{CrawlResult, StoreError};
use crate::ingest::{IngestEngine, IngestReport};
use crate::models::{AdRecord, NewSearchQuery, QueryId, SearchQuery, SiteId, SubscriberId};
use crate::params::{
    ad_detail_url, build_url, listing_page_url, validate_and_canonicalize, QueryKind,
};
use crate::scrapers::{detail, pagination, ListingExtractor, PageFetcher};
use crate::storage::{CascadeReport, Store};

/// Outcome of one crawl pass over a search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub query_id: QueryId,
    pub pages: u32,
    pub ads_seen: usize,
    pub ingest: IngestReport,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenewReport {
    pub renewed: usize,
    /// Detail page did not have the expected layout
    pub unchanged: usize,
    pub failed: usize,
}

/// One async lock per query, shared by crawls and deletion
#[derive(Default)]
struct QueryLocks {
    locks: Mutex<HashMap<QueryId, Arc<tokio::sync::Mutex<()>>>>,
}

impl QueryLocks {
    async fn acquire(&self, id: QueryId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    fn forget(&self, id: QueryId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

pub struct CrawlService {
    store: Arc<dyn Store>,
    listing_fetcher: Arc<dyn PageFetcher>,
    detail_fetcher: Arc<dyn PageFetcher>,
    extractor: ListingExtractor,
    engine: IngestEngine,
    locks: QueryLocks,
}

impl CrawlService {
    pub fn new(
        store: Arc<dyn Store>,
        listing_fetcher: Arc<dyn PageFetcher>,
        detail_fetcher: Arc<dyn PageFetcher>,
        extractor: ListingExtractor,
        engine: IngestEngine,
    ) -> Self {
        Self {
            store,
            listing_fetcher,
            detail_fetcher,
            extractor,
            engine,
            locks: QueryLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Validate a search URL and store it as a new query. Nothing is stored
    /// when validation fails.
    pub async fn create_query(
        &self,
        name: &str,
        url: &str,
        subscribers: impl IntoIterator<Item = SubscriberId>,
    ) -> CrawlResult<SearchQuery> {
        let parameters = validate_and_canonicalize(url, QueryKind::ListingSearch)?;
        let query = self
            .store
            .insert_query(NewSearchQuery {
                name: name.to_string(),
                parameters,
                subscribers: subscribers.into_iter().collect(),
            })
            .await?;
        info!(query_id = %query.id, name = %query.name, "Created search query");
        Ok(query)
    }

    /// Rename a query and/or point it at a new search URL
    pub async fn update_query(
        &self,
        id: QueryId,
        name: Option<String>,
        url: Option<&str>,
    ) -> CrawlResult<SearchQuery> {
        let parameters = url
            .map(|url| validate_and_canonicalize(url, QueryKind::ListingSearch))
            .transpose()?;
        Ok(self.store.update_query(id, name, parameters).await?)
    }

    pub async fn subscribe(&self, id: QueryId, subscriber: SubscriberId) -> CrawlResult<()> {
        Ok(self.store.add_subscriber(id, subscriber).await?)
    }

    pub async fn unsubscribe(&self, id: QueryId, subscriber: SubscriberId) -> CrawlResult<()> {
        Ok(self.store.remove_subscriber(id, subscriber).await?)
    }

    /// Remove a query together with the ads only it was tracking. Waits
    /// for a running crawl of the same query to finish.
    pub async fn delete_query(&self, id: QueryId) -> CrawlResult<CascadeReport> {
        let report = {
            let _guard = self.locks.acquire(id).await;
            self.store.delete_query(id).await?
        };
        self.locks.forget(id);
        info!(query_id = %id, removed_ads = report.removed_ads.len(), "Deleted search query");
        Ok(report)
    }

    pub async fn ads_for_query(&self, id: QueryId) -> CrawlResult<Vec<AdRecord>> {
        Ok(self.store.ads_for_query(id).await?)
    }

    /// One full pass over a query's result pages, one page at a time.
    ///
    /// Any fetch or extraction failure ends the pass; chunks ingested from
    /// earlier pages stay committed.
    pub async fn crawl(&self, id: QueryId) -> CrawlResult<CrawlReport> {
        let _guard = self.locks.acquire(id).await;
        let query = self
            .store
            .get_query(id)
            .await?
            .ok_or(StoreError::QueryNotFound(id))?;

        let first_page = build_url(&query.parameters, QueryKind::ListingSearch);
        let pages = pagination::resolve(self.listing_fetcher.as_ref(), &first_page).await?;
        info!(
            query_id = %id,
            pages,
            strategy = self.listing_fetcher.strategy(),
            "Crawling search query"
        );

        let mut report = CrawlReport {
            query_id: id,
            pages,
            ads_seen: 0,
            ingest: IngestReport::default(),
        };

        for page in 1..=pages {
            let html = self
                .listing_fetcher
                .fetch(&listing_page_url(&query.parameters, page))
                .await?;
            let ads = self.extractor.extract(&html)?;
            report.ads_seen += ads.len();

            let ingested = self.engine.ingest(&query, ads).await?;
            report.ingest.new_ads += ingested.new_ads;
            report.ingest.linked += ingested.linked;
        }

        info!(
            query_id = %id,
            ads_seen = report.ads_seen,
            new_ads = report.ingest.new_ads,
            "Crawl finished"
        );
        Ok(report)
    }

    /// Crawl every stored query concurrently. A failing query is logged and
    /// does not affect the others.
    pub async fn crawl_all(self: &Arc<Self>) -> CrawlResult<Vec<(QueryId, CrawlResult<CrawlReport>)>> {
        let ids = self.store.list_query_ids().await?;
        let mut tasks = JoinSet::new();
        for id in ids {
            let service = Arc::clone(self);
            tasks.spawn(async move { (id, service.crawl(id).await) });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(err) = &result {
                        warn!(query_id = %id, error = %err, "Crawl failed");
                    }
                    results.push((id, result));
                }
                Err(err) => error!(error = %err, "Crawl task panicked"),
            }
        }
        results.sort_by_key(|(id, _)| *id);
        Ok(results)
    }

    /// Refresh one ad from its detail page.
    ///
    /// Returns `None` when the page did not have the expected layout; the
    /// stored ad is left as it was.
    pub async fn renew(&self, id: SiteId) -> CrawlResult<Option<AdRecord>> {
        if self.store.get_ad(id).await?.is_none() {
            return Err(StoreError::AdNotFound(id).into());
        }

        let html = self.detail_fetcher.fetch(&ad_detail_url(id)).await?;
        let update = detail::extract(&html)?;
        if update.is_empty() {
            warn!(site_id = %id, "Detail page layout not recognised, ad left unchanged");
            return Ok(None);
        }

        let ad = self.store.apply_ad_update(id, &update).await?;
        info!(site_id = %id, price = ?ad.price, vat = ?ad.vat, "Renewed ad");
        Ok(Some(ad))
    }

    /// Renew every stored ad, one after another
    pub async fn renew_all(&self) -> CrawlResult<RenewReport> {
        let mut report = RenewReport::default();
        for id in self.store.list_ad_ids().await? {
            match self.renew(id).await {
                Ok(Some(_)) => report.renewed += 1,
                Ok(None) => report.unchanged += 1,
                Err(err) => {
                    warn!(site_id = %id, error = %err, "Renewal failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            renewed = report.renewed,
            unchanged = report.unchanged,
            failed = report.failed,
            "Renewal pass finished"
        );
        Ok(report)
    }
}
