use crate::error::FetchError;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::UserAgentPool;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Plain HTTP fetcher. Each request carries a user agent drawn from the pool.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    agents: UserAgentPool,
}

impl HttpFetcher {
    pub fn new(agents: UserAgentPool, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, agents })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let agent = self.agents.pick();
        debug!(url, agent, "Fetching page");

        let request_failed = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, agent)
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "Page fetch rejected");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(request_failed)?;
        debug!(url, bytes = body.len(), "Downloaded page");
        Ok(body)
    }

    fn strategy(&self) -> &'static str {
        "http"
    }
}
