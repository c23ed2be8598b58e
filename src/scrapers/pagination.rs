use crate::error::FetchError;
use crate::scrapers::traits::PageFetcher;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.pagination").expect("valid pagination selector"));
static PAGINATION_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li").expect("valid pagination item selector"));

/// Number of result pages a listing search spans, read off the
/// pagination control. A page without the control is a single page.
pub fn page_count(html: &str) -> u32 {
    let document = Html::parse_document(html);
    let Some(pagination) = document.select(&PAGINATION).next() else {
        return 1;
    };

    pagination
        .select(&PAGINATION_ITEM)
        .filter_map(|li| li.text().collect::<String>().trim().parse::<u32>().ok())
        .filter(|page| *page > 0)
        .max()
        .unwrap_or(1)
}

/// Fetch the first page of a listing search and count its pages.
/// Transport failures propagate; a missing control does not.
pub async fn resolve(fetcher: &dyn PageFetcher, listing_url: &str) -> Result<u32, FetchError> {
    let html = fetcher.fetch(listing_url).await?;
    let pages = page_count(&html);
    debug!(url = listing_url, pages, "Resolved page count");
    Ok(pages)
}
