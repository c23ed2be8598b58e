//! Cleanup run by the stores when a search query is removed: every ad whose
//! only link is that query is removed with it. Callers run it inside the
//! same transaction as the query removal.

use sqlx::{Postgres, Transaction};

use crate::models::{AdRecord, QueryId, SiteId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub query_id: QueryId,
    pub removed_ads: Vec<SiteId>,
}

/// Ads linked to `query` and nothing else
pub fn orphaned_by<'a>(ads: impl IntoIterator<Item = &'a AdRecord>, query: QueryId) -> Vec<SiteId> {
    ads.into_iter()
        .filter(|ad| ad.queries.len() == 1 && ad.queries.contains(&query))
        .map(|ad| ad.site_id)
        .collect()
}

/// Postgres rendition. The query row must already be locked by the caller.
pub(crate) async fn remove_orphaned_ads(
    tx: &mut Transaction<'_, Postgres>,
    query: QueryId,
) -> Result<Vec<SiteId>, sqlx::Error> {
    // Lock the candidate ads first: a link insert from another query's
    // ingestion holds a key-share lock on the ad row, so this waits for it
    // and the count below sees its link.
    sqlx::query(
        r#"
        SELECT site_id FROM ads
        WHERE site_id IN (SELECT ad_id FROM ad_queries WHERE query_id = $1)
        ORDER BY site_id
        FOR UPDATE
        "#,
    )
    .bind(query.0)
    .execute(&mut **tx)
    .await?;

    let removed: Vec<i64> = sqlx::query_scalar(
        r#"
        DELETE FROM ads
        WHERE site_id IN (
            SELECT ad_id FROM ad_queries
            WHERE ad_id IN (SELECT ad_id FROM ad_queries WHERE query_id = $1)
            GROUP BY ad_id
            HAVING COUNT(*) = 1
        )
        RETURNING site_id
        "#,
    )
    .bind(query.0)
    .fetch_all(&mut **tx)
    .await?;

    let mut removed: Vec<SiteId> = removed.into_iter().map(SiteId).collect();
    removed.sort();
    Ok(removed)
}
