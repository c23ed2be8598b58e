use crate::error::FetchError;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::UserAgentPool;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Rendered fetch through headless Chrome.
///
/// The detail pages fill in prices with scripts, so the tab is given a
/// fixed settle delay after navigation before the DOM is read back.
pub struct BrowserFetcher {
    browser: Browser,
    agents: UserAgentPool,
    settle: Duration,
}

impl BrowserFetcher {
    /// Launch headless Chrome. Fails when no browser is installed.
    pub fn launch(agents: UserAgentPool, settle: Duration) -> anyhow::Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build launch options: {e}"))?;

        let browser = Browser::new(options)?;

        Ok(Self {
            browser,
            agents,
            settle,
        })
    }

    fn render(browser: &Browser, url: &str, agent: &str, settle: Duration) -> anyhow::Result<String> {
        let tab = browser.new_tab()?;
        tab.set_user_agent(agent, None, None)?;
        tab.navigate_to(url)?;
        tab.wait_until_navigated()?;

        thread::sleep(settle);

        let html = tab.get_content()?;
        // a leaked tab keeps its renderer process alive
        if let Err(err) = tab.close(true) {
            debug!(url, error = %err, "Failed to close tab");
        }
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let browser = self.browser.clone();
        let agent = self.agents.pick().to_string();
        let settle = self.settle;
        let target = url.to_string();

        debug!(url, "Rendering page in headless Chrome");

        let rendered =
            tokio::task::spawn_blocking(move || Self::render(&browser, &target, &agent, settle))
                .await
                .map_err(|e| FetchError::Browser {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        rendered.map_err(|e| FetchError::Browser {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn strategy(&self) -> &'static str {
        "browser"
    }
}
