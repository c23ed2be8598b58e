//! Turns extracted listing cards into stored ads and query links.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{AdRecord, RawAd, SearchQuery, SiteId};
use crate::notify::{Notification, NotificationQueue};
use crate::params::ad_detail_url;
use crate::storage::Store;

pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Commits of one chunk that lost a race are retried this many times
const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Ads seen for the first time
    pub new_ads: usize,
    /// Ads linked to the query, new ones included
    pub linked: usize,
}

impl IngestReport {
    fn add(&mut self, other: IngestReport) {
        self.new_ads += other.new_ads;
        self.linked += other.linked;
    }
}

pub struct IngestEngine {
    store: Arc<dyn Store>,
    notifications: NotificationQueue,
    chunk_size: usize,
}

impl IngestEngine {
    pub fn new(store: Arc<dyn Store>, notifications: NotificationQueue, chunk_size: usize) -> Self {
        Self {
            store,
            notifications,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Store the ads of one crawl pass and link them to `query`.
    ///
    /// Known ads are only linked; their fields are never refreshed here.
    /// Subscribers hear about new ads once the chunk holding them is
    /// committed. A failing chunk leaves earlier chunks committed.
    pub async fn ingest(&self, query: &SearchQuery, ads: Vec<RawAd>) -> StoreResult<IngestReport> {
        let mut report = IngestReport::default();
        for chunk in ads.chunks(self.chunk_size) {
            report.add(self.ingest_chunk(query, chunk).await?);
        }
        debug!(
            query_id = %query.id,
            new_ads = report.new_ads,
            linked = report.linked,
            "Ingested crawl pass"
        );
        Ok(report)
    }

    async fn ingest_chunk(&self, query: &SearchQuery, chunk: &[RawAd]) -> StoreResult<IngestReport> {
        let chunk = first_occurrences(chunk);
        let ids: Vec<SiteId> = chunk.iter().map(|ad| ad.site_id).collect();

        let mut retries = 0;
        loop {
            let existing = self.store.existing_ad_ids(&ids).await?;
            let now = Utc::now();
            let new_ads: Vec<AdRecord> = chunk
                .iter()
                .filter(|ad| !existing.contains(&ad.site_id))
                .map(|ad| AdRecord::from_raw((*ad).clone(), now))
                .collect();

            match self.store.commit_chunk(query.id, &new_ads, &ids).await {
                Ok(()) => {
                    self.announce(query, &new_ads);
                    return Ok(IngestReport {
                        new_ads: new_ads.len(),
                        linked: ids.len(),
                    });
                }
                Err(StoreError::Conflict { .. }) if retries < MAX_CONFLICT_RETRIES => {
                    retries += 1;
                    warn!(query_id = %query.id, retries, "Chunk raced with another writer, re-checking");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn announce(&self, query: &SearchQuery, new_ads: &[AdRecord]) {
        for ad in new_ads {
            let text = ad_detail_url(ad.site_id);
            let image_url = (!ad.image_url.is_empty()).then(|| ad.image_url.clone());
            for &recipient in &query.subscribers {
                self.notifications.enqueue(Notification {
                    recipient,
                    text: text.clone(),
                    image_url: image_url.clone(),
                });
            }
        }
    }
}

fn first_occurrences(chunk: &[RawAd]) -> Vec<&RawAd> {
    let mut seen = HashSet::new();
    chunk.iter().filter(|ad| seen.insert(ad.site_id)).collect()
}
