use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};

use crate::error::StoreResult;
use crate::models::{
    AdRecord, AdUpdate, NewSearchQuery, Parameters, QueryId, SearchQuery, SiteId, SubscriberId,
};

pub mod cascade;
pub mod memory;
pub mod postgres;

pub use cascade::CascadeReport;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence of search queries, ads and the links between them.
///
/// Every method is its own transaction.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_query(&self, query: NewSearchQuery) -> StoreResult<SearchQuery>;

    async fn get_query(&self, id: QueryId) -> StoreResult<Option<SearchQuery>>;

    async fn list_query_ids(&self) -> StoreResult<Vec<QueryId>>;

    /// Rename and/or replace the parameters of a query
    async fn update_query(
        &self,
        id: QueryId,
        name: Option<String>,
        parameters: Option<Parameters>,
    ) -> StoreResult<SearchQuery>;

    async fn add_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()>;

    async fn remove_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()>;

    /// Remove a query. Ads linked to nothing else go with it, in the same
    /// transaction.
    async fn delete_query(&self, id: QueryId) -> StoreResult<CascadeReport>;

    /// Which of `ids` are already stored
    async fn existing_ad_ids(&self, ids: &[SiteId]) -> StoreResult<HashSet<SiteId>>;

    /// Insert `new_ads` and link every id in `links` to `query`, atomically.
    ///
    /// Existing links are left as they are. Fails with
    /// `StoreError::Conflict` when one of `new_ads` already exists or one of
    /// the linked ads has disappeared; nothing is written in that case.
    async fn commit_chunk(
        &self,
        query: QueryId,
        new_ads: &[AdRecord],
        links: &[SiteId],
    ) -> StoreResult<()>;

    async fn get_ad(&self, id: SiteId) -> StoreResult<Option<AdRecord>>;

    async fn list_ad_ids(&self) -> StoreResult<Vec<SiteId>>;

    async fn ads_for_query(&self, id: QueryId) -> StoreResult<Vec<AdRecord>>;

    /// Apply a detail update as one write. Returns the updated record.
    async fn apply_ad_update(&self, id: SiteId, update: &AdUpdate) -> StoreResult<AdRecord>;
}

pub(crate) fn subscriber_set(ids: impl IntoIterator<Item = i64>) -> BTreeSet<SubscriberId> {
    ids.into_iter().map(SubscriberId).collect()
}
