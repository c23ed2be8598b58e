use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    AdRecord, AdUpdate, NewSearchQuery, Parameters, QueryId, SearchQuery, SiteId, SubscriberId,
};
use crate::params::QueryKind;
use crate::storage::cascade::{self, CascadeReport};
use crate::storage::{subscriber_set, Store};

const QUERY_SELECT: &str = r#"
    SELECT q.id, q.root_url, q.name, q.parameters, q.created_at, q.updated_at,
           COALESCE(array_agg(s.subscriber_id) FILTER (WHERE s.subscriber_id IS NOT NULL), '{}') AS subscribers
    FROM search_queries q
    LEFT JOIN search_query_subscribers s ON s.query_id = q.id
"#;

const AD_SELECT: &str = r#"
    SELECT a.site_id, a.name, a.price, a.vat, a.date, a.description, a.image_url,
           a.created_at, a.updated_at,
           COALESCE(array_agg(l.query_id) FILTER (WHERE l.query_id IS NOT NULL), '{}') AS queries
    FROM ads a
    LEFT JOIN ad_queries l ON l.ad_id = a.site_id
"#;

/// Postgres-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn query_exists(&self, id: QueryId) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM search_queries WHERE id = $1)")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

fn query_from_row(row: &PgRow) -> StoreResult<SearchQuery> {
    let parameters: Parameters = serde_json::from_value(row.try_get("parameters")?)?;
    let subscribers: Vec<i64> = row.try_get("subscribers")?;
    Ok(SearchQuery {
        id: QueryId(row.try_get("id")?),
        root_url: row.try_get("root_url")?,
        name: row.try_get("name")?,
        parameters,
        subscribers: subscriber_set(subscribers),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ad_from_row(row: &PgRow) -> StoreResult<AdRecord> {
    let vat: Option<i16> = row.try_get("vat")?;
    let queries: Vec<i64> = row.try_get("queries")?;
    Ok(AdRecord {
        site_id: SiteId(row.try_get("site_id")?),
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        vat: vat.and_then(|v| u8::try_from(v).ok()),
        date: row.try_get("date")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        queries: queries.into_iter().map(QueryId).collect(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// SQLSTATEs that mean a chunk lost a race with another writer: unique and
/// foreign-key violations, serialization failures and deadlocks
const CONFLICT_CODES: &[&str] = &["23505", "23503", "40001", "40P01"];

fn is_conflict_code(code: &str) -> bool {
    CONFLICT_CODES.contains(&code)
}

fn conflict_or(err: sqlx::Error, query: QueryId) -> StoreError {
    let raced = match &err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_conflict_code(&code)),
        _ => false,
    };
    if raced {
        StoreError::Conflict { query_id: query }
    } else {
        err.into()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_query(&self, query: NewSearchQuery) -> StoreResult<SearchQuery> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO search_queries (root_url, name, parameters)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(QueryKind::ListingSearch.schema().root_url())
        .bind(&query.name)
        .bind(serde_json::to_value(&query.parameters)?)
        .fetch_one(&mut *tx)
        .await?;

        let subscribers: Vec<i64> = query.subscribers.iter().map(|s| s.0).collect();
        sqlx::query(
            r#"
            INSERT INTO search_query_subscribers (query_id, subscriber_id)
            SELECT $1, subscriber_id FROM UNNEST($2::bigint[]) AS t(subscriber_id)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&subscribers)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_query(QueryId(id))
            .await?
            .ok_or(StoreError::QueryNotFound(QueryId(id)))
    }

    async fn get_query(&self, id: QueryId) -> StoreResult<Option<SearchQuery>> {
        let row = sqlx::query(&format!("{QUERY_SELECT} WHERE q.id = $1 GROUP BY q.id"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(query_from_row).transpose()
    }

    async fn list_query_ids(&self) -> StoreResult<Vec<QueryId>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM search_queries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(QueryId).collect())
    }

    async fn update_query(
        &self,
        id: QueryId,
        name: Option<String>,
        parameters: Option<Parameters>,
    ) -> StoreResult<SearchQuery> {
        let parameters = parameters.map(|p| serde_json::to_value(&p)).transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE search_queries
            SET name = COALESCE($2, name),
                parameters = COALESCE($3, parameters),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(name)
        .bind(parameters)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::QueryNotFound(id));
        }
        self.get_query(id).await?.ok_or(StoreError::QueryNotFound(id))
    }

    async fn add_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO search_query_subscribers (query_id, subscriber_id)
            SELECT id, $2 FROM search_queries WHERE id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id.0)
        .bind(subscriber.0)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 && !self.query_exists(id).await? {
            return Err(StoreError::QueryNotFound(id));
        }
        Ok(())
    }

    async fn remove_subscriber(&self, id: QueryId, subscriber: SubscriberId) -> StoreResult<()> {
        let removed = sqlx::query(
            "DELETE FROM search_query_subscribers WHERE query_id = $1 AND subscriber_id = $2",
        )
        .bind(id.0)
        .bind(subscriber.0)
        .execute(&self.pool)
        .await?;

        if removed.rows_affected() == 0 && !self.query_exists(id).await? {
            return Err(StoreError::QueryNotFound(id));
        }
        Ok(())
    }

    async fn delete_query(&self, id: QueryId) -> StoreResult<CascadeReport> {
        let mut tx = self.pool.begin().await?;

        // exclusive with chunk commits for this query, which take FOR SHARE
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM search_queries WHERE id = $1 FOR UPDATE")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::QueryNotFound(id));
        }

        let removed_ads = cascade::remove_orphaned_ads(&mut tx, id).await?;

        sqlx::query("DELETE FROM search_queries WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(query_id = %id, removed = removed_ads.len(), "Deleted search query");

        Ok(CascadeReport {
            query_id: id,
            removed_ads,
        })
    }

    async fn existing_ad_ids(&self, ids: &[SiteId]) -> StoreResult<HashSet<SiteId>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let found: Vec<i64> = sqlx::query_scalar("SELECT site_id FROM ads WHERE site_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(found.into_iter().map(SiteId).collect())
    }

    async fn commit_chunk(
        &self,
        query: QueryId,
        new_ads: &[AdRecord],
        links: &[SiteId],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM search_queries WHERE id = $1 FOR SHARE")
                .bind(query.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| conflict_or(e, query))?;
        if locked.is_none() {
            return Err(StoreError::QueryNotFound(query));
        }

        // rows are written in id order so concurrent chunks lock them in the
        // same order
        let mut new_ads: Vec<&AdRecord> = new_ads.iter().collect();
        new_ads.sort_by_key(|ad| ad.site_id);
        let mut link_ids: Vec<i64> = links.iter().map(|id| id.0).collect();
        link_ids.sort_unstable();
        link_ids.dedup();

        if !new_ads.is_empty() {
            let site_ids: Vec<i64> = new_ads.iter().map(|a| a.site_id.0).collect();
            let names: Vec<&str> = new_ads.iter().map(|a| a.name.as_str()).collect();
            let prices: Vec<Option<i64>> = new_ads.iter().map(|a| a.price).collect();
            let vats: Vec<Option<i16>> = new_ads.iter().map(|a| a.vat.map(i16::from)).collect();
            let dates: Vec<Option<DateTime<Utc>>> = new_ads.iter().map(|a| a.date).collect();
            let descriptions: Vec<&str> = new_ads.iter().map(|a| a.description.as_str()).collect();
            let images: Vec<&str> = new_ads.iter().map(|a| a.image_url.as_str()).collect();
            let created: Vec<DateTime<Utc>> = new_ads.iter().map(|a| a.created_at).collect();
            let updated: Vec<DateTime<Utc>> = new_ads.iter().map(|a| a.updated_at).collect();

            sqlx::query(
                r#"
                INSERT INTO ads (
                    site_id, name, price, vat, date, description, image_url, created_at, updated_at
                )
                SELECT * FROM UNNEST(
                    $1::bigint[], $2::text[], $3::bigint[], $4::smallint[], $5::timestamptz[],
                    $6::text[], $7::text[], $8::timestamptz[], $9::timestamptz[]
                )
                "#,
            )
            .bind(&site_ids)
            .bind(&names)
            .bind(&prices)
            .bind(&vats)
            .bind(&dates)
            .bind(&descriptions)
            .bind(&images)
            .bind(&created)
            .bind(&updated)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, query))?;
        }

        sqlx::query(
            r#"
            INSERT INTO ad_queries (ad_id, query_id)
            SELECT ad_id, $2 FROM UNNEST($1::bigint[]) AS t(ad_id)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&link_ids)
        .bind(query.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, query))?;

        tx.commit().await.map_err(|e| conflict_or(e, query))?;
        Ok(())
    }

    async fn get_ad(&self, id: SiteId) -> StoreResult<Option<AdRecord>> {
        let row = sqlx::query(&format!("{AD_SELECT} WHERE a.site_id = $1 GROUP BY a.site_id"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ad_from_row).transpose()
    }

    async fn list_ad_ids(&self) -> StoreResult<Vec<SiteId>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT site_id FROM ads ORDER BY site_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(SiteId).collect())
    }

    async fn ads_for_query(&self, id: QueryId) -> StoreResult<Vec<AdRecord>> {
        let rows = sqlx::query(&format!(
            "{AD_SELECT} WHERE a.site_id IN (SELECT ad_id FROM ad_queries WHERE query_id = $1) \
             GROUP BY a.site_id ORDER BY a.site_id"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ad_from_row).collect()
    }

    async fn apply_ad_update(&self, id: SiteId, update: &AdUpdate) -> StoreResult<AdRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE ads
            SET name = COALESCE($2, name),
                price = COALESCE($3, price),
                vat = COALESCE($4, vat),
                image_url = COALESCE($5, image_url),
                updated_at = now()
            WHERE site_id = $1
            "#,
        )
        .bind(id.0)
        .bind(update.name.as_deref())
        .bind(update.price)
        .bind(update.vat.map(i16::from))
        .bind(update.image_url.as_deref())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::AdNotFound(id));
        }
        self.get_ad(id).await?.ok_or(StoreError::AdNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_races_are_conflicts() {
        for code in ["23505", "23503", "40001", "40P01"] {
            assert!(is_conflict_code(code), "{code}");
        }
    }

    #[test]
    fn other_failures_are_not() {
        for code in ["23514", "42P01", "57014", "08006"] {
            assert!(!is_conflict_code(code), "{code}");
        }
        let err = conflict_or(sqlx::Error::RowNotFound, QueryId(1));
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
