//! In-memory store for tests and runs without a database.
//!
//! All state sits behind one lock, so each method is trivially atomic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    AdRecord, AdUpdate, NewSearchQuery, Parameters, QueryId, SearchQuery, SiteId, SubscriberId,
};
use crate::params::QueryKind;
use crate::storage::cascade::{self, CascadeReport};
use crate::storage::Store;

#[derive(Default)]
struct State {
    last_query_id: i64,
    queries: BTreeMap<QueryId, SearchQuery>,
    ads: BTreeMap<SiteId, AdRecord>,
}

impl State {
    fn query_mut(&mut self, id: QueryId) -> StoreResult<&mut SearchQuery> {
        self.queries.get_mut(&id).ok_or(StoreError::QueryNotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ads
    pub async fn ad_count(&self) -> usize {
        self.state.lock().await.ads.len()
    }

    /// Number of (ad, query) links
    pub async fn link_count(&self) -> usize {
        self.state.lock().await.ads.values().map(|ad| ad.queries.len()).sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_query(&self, query: NewSearchQuery) -> StoreResult<SearchQuery> {
        let mut state = self.state.lock().await;
        state.last_query_id += 1;
        let now = Utc::now();
        let stored = SearchQuery {
            id: QueryId(state.last_query_id),
            root_url: QueryKind::ListingSearch.schema().root_url().to_string(),
            name: query.name,
            parameters: query.parameters,
            subscribers: query.subscribers,
            created_at: now,
            updated_at: now,
        };
        state.queries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_query(&self, id: QueryId) -> StoreResult<Option<SearchQuery>> {
        Ok(self.state.lock().await.queries.get(&id).cloned())
    }

    async fn list_query_ids(&self) -> StoreResult<Vec<QueryId>> {
        Ok(self.state.lock().await.queries.keys().copied().collect())
    }

    async fn update_query(
        &self,
        id: QueryId,
        name: Option<String>,
        parameters: Option<Parameters>,
    ) -> StoreResult<SearchQuery> {
        let mut state = self.state.lock().await;
        let query = state.query_mut(id)?;
        if let Some(name) = name {
            query.name = name;
        }
        if let Some(parameters) = parameters {
            query.parameters = parameters;
        }
        query.updated_at = Utc::now();
        Ok(query.clone())
    }

    async fn add_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.query_mut(id)?.subscribers.insert(subscriber);
        Ok(())
    }

    async fn remove_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.query_mut(id)?.subscribers.remove(&subscriber);
        Ok(())
    }

    async fn delete_query(&self, id: QueryId) -> StoreResult<CascadeReport> {
        let mut state = self.state.lock().await;
        if !state.queries.contains_key(&id) {
            return Err(StoreError::QueryNotFound(id));
        }

        let removed_ads = cascade::orphaned_by(state.ads.values(), id);
        for site_id in &removed_ads {
            state.ads.remove(site_id);
        }
        for ad in state.ads.values_mut() {
            ad.queries.remove(&id);
        }
        state.queries.remove(&id);

        Ok(CascadeReport {
            query_id: id,
            removed_ads,
        })
    }

    async fn existing_ad_ids(&self, ids: &[SiteId]) -> StoreResult<HashSet<SiteId>> {
        let state = self.state.lock().await;
        Ok(ids.iter().copied().filter(|id| state.ads.contains_key(id)).collect())
    }

    async fn commit_chunk(
        &self,
        query: QueryId,
        new_ads: &[AdRecord],
        links: &[SiteId],
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.queries.contains_key(&query) {
            return Err(StoreError::QueryNotFound(query));
        }

        let new_ids: HashSet<SiteId> = new_ads.iter().map(|ad| ad.site_id).collect();
        let duplicate = new_ads.iter().any(|ad| state.ads.contains_key(&ad.site_id));
        let dangling = links
            .iter()
            .any(|id| !new_ids.contains(id) && !state.ads.contains_key(id));
        if duplicate || dangling {
            return Err(StoreError::Conflict { query_id: query });
        }

        for ad in new_ads {
            state.ads.insert(ad.site_id, ad.clone());
        }
        for id in links {
            if let Some(ad) = state.ads.get_mut(id) {
                ad.queries.insert(query);
            }
        }
        Ok(())
    }

    async fn get_ad(&self, id: SiteId) -> StoreResult<Option<AdRecord>> {
        Ok(self.state.lock().await.ads.get(&id).cloned())
    }

    async fn list_ad_ids(&self) -> StoreResult<Vec<SiteId>> {
        Ok(self.state.lock().await.ads.keys().copied().collect())
    }

    async fn ads_for_query(&self, id: QueryId) -> StoreResult<Vec<AdRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .ads
            .values()
            .filter(|ad| ad.queries.contains(&id))
            .cloned()
            .collect())
    }

    async fn apply_ad_update(&self, id: SiteId, update: &AdUpdate) -> StoreResult<AdRecord> {
        let mut state = self.state.lock().await;
        let ad = state.ads.get_mut(&id).ok_or(StoreError::AdNotFound(id))?;
        ad.apply(update, Utc::now());
        Ok(ad.clone())
    }
}
