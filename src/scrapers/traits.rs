use crate::error::FetchError;
use async_trait::async_trait;

/// Anything that can turn a URL into page HTML.
/// Lets the crawler swap plain HTTP for a rendered browser fetch.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page body; non-success statuses are errors
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Short name of the strategy, for logs
    fn strategy(&self) -> &'static str;
}
