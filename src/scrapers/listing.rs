use crate::error::ExtractionError;
use crate::models::{RawAd, SiteId};
use crate::params::QueryKind;
use crate::scrapers::fields;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

const POSTED_SINCE_FORMAT: &str = "Ad online since %b %d, %Y, %I:%M %p";
const NEW_BADGE_CLASS: &str = "new-headline-label";

struct ListingSelectors {
    result_list: Selector,
    card: Selector,
    link: Selector,
    headline: Selector,
    price_block: Selector,
    span: Selector,
    vehicle_data: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<ListingSelectors> = LazyLock::new(|| {
    let parse = |css: &str| Selector::parse(css).expect("valid listing selector");
    ListingSelectors {
        result_list: parse("div.cBox--resultList"),
        card: parse("div.cBox-body--resultitem, div.cBox-body--eyeCatcher"),
        link: parse("a"),
        headline: parse("div.headline-block"),
        price_block: parse("div.price-block"),
        span: parse("span"),
        vehicle_data: parse(r#"div[class^="vehicle-data"], div[class*=" vehicle-data"]"#),
        image: parse("div.image-block img"),
    }
});

/// Reads ad cards off one page of search results.
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    /// Offset the site renders its "online since" timestamps in
    site_offset: FixedOffset,
}

impl Default for ListingExtractor {
    fn default() -> Self {
        Self::new(FixedOffset::east_opt(3600).unwrap_or_else(|| Utc.fix()))
    }
}

impl ListingExtractor {
    pub fn new(site_offset: FixedOffset) -> Self {
        Self { site_offset }
    }

    /// All ad cards of the page, in document order.
    ///
    /// A card without an id in its link makes the whole page unusable:
    /// skipping it would silently shrink the crawl.
    pub fn extract(&self, html: &str) -> Result<Vec<RawAd>, ExtractionError> {
        let document = Html::parse_document(html);
        let s = &*SELECTORS;

        let results = document
            .select(&s.result_list)
            .next()
            .ok_or(ExtractionError::MissingLandmark("div.cBox--resultList"))?;

        let ads = results
            .select(&s.card)
            .map(|card| self.extract_card(card))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = ads.len(), "Extracted ad cards");
        Ok(ads)
    }

    fn extract_card(&self, card: ElementRef<'_>) -> Result<RawAd, ExtractionError> {
        let s = &*SELECTORS;

        let href = card
            .select(&s.link)
            .next()
            .and_then(|a| a.value().attr("href"));
        let site_id = parse_card_link(href)?;

        let (name, date) = self.headline(card);
        let (price, vat) = price_and_vat(card);

        let description = card
            .select(&s.vehicle_data)
            .next()
            .map(fields::plain_text)
            .unwrap_or_default();

        let image_url = card
            .select(&s.image)
            .next()
            .and_then(fields::image_url)
            .unwrap_or_default();

        Ok(RawAd {
            site_id,
            name,
            date,
            price,
            vat,
            description,
            image_url,
        })
    }

    fn headline(&self, card: ElementRef<'_>) -> (String, Option<DateTime<Utc>>) {
        let s = &*SELECTORS;
        let spans: Vec<String> = card
            .select(&s.headline)
            .next()
            .map(|block| {
                block
                    .select(&s.span)
                    .filter(|span| !span.value().classes().any(|c| c == NEW_BADGE_CLASS))
                    .map(|span| span.text().collect::<String>().trim().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let name = spans.first().cloned().unwrap_or_default();
        let date = match spans.as_slice() {
            [_, posted] => self.parse_posted_since(posted),
            _ => None,
        };
        (name, date)
    }

    fn parse_posted_since(&self, text: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(text, POSTED_SINCE_FORMAT).ok()?;
        self.site_offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn parse_card_link(href: Option<&str>) -> Result<SiteId, ExtractionError> {
    let missing = || ExtractionError::MissingSiteId {
        href: href.map(str::to_string),
    };
    let href = href.ok_or_else(missing)?;

    let url = Url::parse(href)
        .or_else(|_| Url::parse(QueryKind::ListingSearch.schema().root_url())?.join(href))
        .map_err(|_| missing())?;

    let site_id = url
        .query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| value.trim().parse::<i64>().ok())
        .ok_or_else(missing)?;

    Ok(SiteId(site_id))
}

/// Price from the first span of the price block, VAT from the second.
/// A missing or unreadable second span only loses the VAT.
fn price_and_vat(card: ElementRef<'_>) -> (Option<i64>, Option<u8>) {
    let s = &*SELECTORS;
    let Some(block) = card.select(&s.price_block).next() else {
        return (None, None);
    };

    let spans: Vec<String> = block
        .select(&s.span)
        .take(2)
        .map(|span| span.text().collect())
        .collect();

    let price = spans.first().and_then(|text| fields::digits(text));
    let vat = spans.get(1).and_then(|text| fields::parse_vat(text));
    (price, vat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing_html, CardFixture};
    use chrono::Timelike;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn extracts_cards_in_document_order() {
        let html = listing_html(&[CardFixture::new(101), CardFixture::new(102), CardFixture::new(103)]);
        let ads = extractor().extract(&html).unwrap();
        let ids: Vec<i64> = ads.iter().map(|a| a.site_id.0).collect();
        assert_eq!(ids, vec![101, 102, 103]);
    }

    #[test]
    fn reads_all_card_fields() {
        let card = CardFixture::new(325_812_345)
            .headline(&["VW Golf 1.6 TDI", "Ad online since Aug 02, 2021, 09:05 PM"])
            .prices(&["10.500 €", "19% VAT"])
            .vehicle_data("<b>Used vehicle</b>,\n  <span>Accident-free</span>")
            .image(Some("//img.classistatic.de/api/v1/images/ab/foo$_2.jpg"), None);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        let ad = &ads[0];

        assert_eq!(ad.site_id, SiteId(325_812_345));
        assert_eq!(ad.name, "VW Golf 1.6 TDI");
        let date = ad.date.unwrap();
        assert_eq!(date.to_rfc3339(), "2021-08-02T21:05:00+00:00");
        assert_eq!(date.minute(), 5);
        assert_eq!(ad.price, Some(10_500));
        assert_eq!(ad.vat, Some(19));
        assert_eq!(ad.description, "Used vehicle , Accident-free");
        assert_eq!(ad.image_url, "https://img.classistatic.de/api/v1/images/ab/foo$_10.jpg");
    }

    #[test]
    fn posted_since_uses_site_offset() {
        let card = CardFixture::new(1).headline(&["Golf", "Ad online since Aug 02, 2021, 09:05 AM"]);
        let ads = ListingExtractor::new(FixedOffset::east_opt(7200).unwrap())
            .extract(&listing_html(&[card]))
            .unwrap();
        assert_eq!(ads[0].date.unwrap().to_rfc3339(), "2021-08-02T07:05:00+00:00");
    }

    #[test]
    fn new_badge_is_not_part_of_the_headline() {
        let card = CardFixture::new(1)
            .new_badge()
            .headline(&["BMW 320d", "Ad online since Jan 15, 2022, 11:30 AM"]);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].name, "BMW 320d");
        assert!(ads[0].date.is_some());
    }

    #[test]
    fn unreadable_date_keeps_name_only() {
        let card = CardFixture::new(1).headline(&["BMW 320d", "Sponsored"]);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].name, "BMW 320d");
        assert_eq!(ads[0].date, None);
    }

    #[test]
    fn single_headline_span_has_no_date() {
        let card = CardFixture::new(1).headline(&["  Audi A4 Avant  "]);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].name, "Audi A4 Avant");
        assert_eq!(ads[0].date, None);
    }

    #[test]
    fn single_price_span_has_no_vat() {
        let card = CardFixture::new(1).prices(&["8.990 €"]);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].price, Some(8_990));
        assert_eq!(ads[0].vat, None);
    }

    #[test]
    fn unreadable_vat_keeps_price() {
        let card = CardFixture::new(1).prices(&["8.990 €", "VAT deductible"]);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].price, Some(8_990));
        assert_eq!(ads[0].vat, None);
    }

    #[test]
    fn image_falls_back_to_data_src() {
        let card = CardFixture::new(1).image(Some(""), Some("https://img/lazy$_27.jpg"));
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].image_url, "https://img/lazy$_10.jpg");
    }

    #[test]
    fn missing_image_is_empty() {
        let ads = extractor().extract(&listing_html(&[CardFixture::new(1)])).unwrap();
        assert_eq!(ads[0].image_url, "");

        let card = CardFixture::new(2).image(None, None);
        let ads = extractor().extract(&listing_html(&[card])).unwrap();
        assert_eq!(ads[0].image_url, "");
    }

    #[test]
    fn card_without_id_aborts_the_page() {
        let html = listing_html(&[CardFixture::new(1), CardFixture::new(2).without_id()]);
        let err = extractor().extract(&html).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingSiteId { href: Some(_) }));
    }

    #[test]
    fn page_without_result_list_fails() {
        let err = extractor()
            .extract("<html><body><div class=\"captcha\"></div></body></html>")
            .unwrap_err();
        assert_eq!(err, ExtractionError::MissingLandmark("div.cBox--resultList"));
    }

    #[test]
    fn empty_result_list_has_no_ads() {
        let ads = extractor().extract(&listing_html(&[])).unwrap();
        assert!(ads.is_empty());
    }
}
