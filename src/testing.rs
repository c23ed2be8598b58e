//! Canned pages and fetchers for unit tests.

use crate::error::FetchError;
use crate::models::{RawAd, SiteId};
use crate::scrapers::PageFetcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves fixed bodies by exact URL; anything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    fn strategy(&self) -> &'static str {
        "static"
    }
}

pub fn pagination_html(labels: &[&str]) -> String {
    let items: String = labels
        .iter()
        .map(|label| format!("<li><span class=\"btn\">{label}</span></li>"))
        .collect();
    format!("<html><body><ul class=\"pagination\">{items}</ul></body></html>")
}

/// One search result card
#[derive(Debug, Clone)]
pub struct CardFixture {
    id: Option<i64>,
    new_badge: bool,
    headline: Vec<String>,
    prices: Vec<String>,
    vehicle_data: String,
    image: Option<(Option<String>, Option<String>)>,
}

impl CardFixture {
    pub fn new(id: i64) -> Self {
        Self {
            id: Some(id),
            new_badge: false,
            headline: vec![format!("Car {id}")],
            prices: vec!["10.000 €".to_string()],
            vehicle_data: "Used vehicle".to_string(),
            image: None,
        }
    }

    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    pub fn new_badge(mut self) -> Self {
        self.new_badge = true;
        self
    }

    pub fn headline(mut self, spans: &[&str]) -> Self {
        self.headline = spans.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn prices(mut self, spans: &[&str]) -> Self {
        self.prices = spans.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn vehicle_data(mut self, inner_html: &str) -> Self {
        self.vehicle_data = inner_html.to_string();
        self
    }

    pub fn image(mut self, src: Option<&str>, data_src: Option<&str>) -> Self {
        self.image = Some((src.map(str::to_string), data_src.map(str::to_string)));
        self
    }

    fn render(&self) -> String {
        let href = match self.id {
            Some(id) => format!(
                "https://suchen.mobile.de/fahrzeuge/details.html?id={id}&amp;action=eyeCatcher&amp;searchId=1"
            ),
            None => "https://suchen.mobile.de/fahrzeuge/details.html?action=eyeCatcher".to_string(),
        };

        let mut headline = String::new();
        if self.new_badge {
            headline.push_str("<span class=\"new-headline-label\">NEW</span>");
        }
        for span in &self.headline {
            headline.push_str(&format!("<span class=\"h3\">{span}</span>"));
        }

        let prices: String = self
            .prices
            .iter()
            .map(|p| format!("<span class=\"u-block\">{p}</span>"))
            .collect();

        let image = match &self.image {
            None => String::new(),
            Some((src, data_src)) => {
                let mut attrs = String::new();
                if let Some(src) = src {
                    attrs.push_str(&format!(" src=\"{src}\""));
                }
                if let Some(data_src) = data_src {
                    attrs.push_str(&format!(" data-src=\"{data_src}\""));
                }
                format!("<div class=\"image-block\"><img{attrs}></div>")
            }
        };

        format!(
            "<div class=\"cBox-body cBox-body--resultitem\">\
             <a class=\"link--muted\" href=\"{href}\">\
             <div class=\"headline-block\">{headline}</div>\
             <div class=\"price-block\">{prices}</div>\
             <div class=\"vehicle-data--ad-with-price-rating-label\">{vehicle_data}</div>\
             {image}\
             </a></div>",
            vehicle_data = self.vehicle_data,
        )
    }
}

pub fn listing_html(cards: &[CardFixture]) -> String {
    let cards: String = cards.iter().map(CardFixture::render).collect();
    format!(
        "<html><body><div class=\"cBox cBox--resultList\">{cards}</div>\
         <ul class=\"pagination\"><li>1</li></ul></body></html>"
    )
}

/// Detail page with `main` as the content of the main block
pub fn detail_html(main: &str) -> String {
    format!(
        "<html><body><div class=\"viewport\"><div>\
         <header>Navigation</header>\
         <section>\
         <div class=\"g-row\">Breadcrumbs</div>\
         <div class=\"g-row\">{main}</div>\
         </section>\
         </div></div></body></html>"
    )
}

pub fn raw_ad(id: i64) -> RawAd {
    RawAd {
        site_id: SiteId(id),
        name: format!("Car {id}"),
        date: None,
        price: Some(10_000),
        vat: Some(19),
        description: "Used vehicle".to_string(),
        image_url: format!("https://img/{id}$_10.jpg"),
    }
}
