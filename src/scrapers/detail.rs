use crate::error::ExtractionError;
use crate::models::AdUpdate;
use crate::scrapers::fields;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

struct DetailSelectors {
    viewport_frame: Selector,
    g_row: Selector,
    title: Selector,
    price: Selector,
    vat: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<DetailSelectors> = LazyLock::new(|| {
    let parse = |css: &str| Selector::parse(css).expect("valid detail selector");
    DetailSelectors {
        viewport_frame: parse("div.viewport > div"),
        g_row: parse("div.g-row"),
        title: parse("h1#ad-title"),
        price: parse(r#"span[data-testid="prime-price"]"#),
        vat: parse(r#"span[data-testid="vat"]"#),
        image: parse("img"),
    }
});

/// Main content block: the last top-level `g-row` of the second section
/// inside the viewport frame.
fn main_block(document: &Html) -> Option<ElementRef<'_>> {
    let s = &*SELECTORS;
    let frame = document.select(&s.viewport_frame).next()?;
    let section = frame.children().filter_map(ElementRef::wrap).nth(1)?;
    section
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| s.g_row.matches(child))
        .last()
}

/// Fields an ad detail page can refresh.
///
/// An empty update means the page did not have the expected layout and the
/// stored ad must be left alone. A layout with no price is an error.
pub fn extract(html: &str) -> Result<AdUpdate, ExtractionError> {
    let document = Html::parse_document(html);
    let s = &*SELECTORS;

    let Some(main) = main_block(&document) else {
        debug!("Detail page has no main block");
        return Ok(AdUpdate::default());
    };

    let price = main
        .select(&s.price)
        .next()
        .and_then(|el| fields::digits(&el.text().collect::<String>()))
        .ok_or(ExtractionError::MissingPrice)?;

    let name = main
        .select(&s.title)
        .next()
        .map(fields::collapsed_text)
        .filter(|t| !t.is_empty());

    let vat = main
        .select(&s.vat)
        .next()
        .and_then(|el| fields::parse_vat(&el.text().collect::<String>()));

    let image_url = main.select(&s.image).next().and_then(fields::image_url);

    Ok(AdUpdate {
        name,
        price: Some(price),
        vat,
        image_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::detail_html;

    #[test]
    fn reads_main_block_fields() {
        let html = detail_html(
            "<h1 id=\"ad-title\">\n  Volkswagen   Golf\n 1.6 TDI </h1>\
             <span data-testid=\"prime-price\">€12,490</span>\
             <span data-testid=\"vat\">19% VAT</span>\
             <img data-src=\"//img.classistatic.de/x$_57.jpg\">",
        );
        let update = extract(&html).unwrap();
        assert_eq!(
            update,
            AdUpdate {
                name: Some("Volkswagen Golf 1.6 TDI".to_string()),
                price: Some(12_490),
                vat: Some(19),
                image_url: Some("https://img.classistatic.de/x$_10.jpg".to_string()),
            }
        );
    }

    #[test]
    fn missing_vat_and_image_are_omitted() {
        let html = detail_html(
            "<h1 id=\"ad-title\">Golf</h1><span data-testid=\"prime-price\">€ 9.990</span>",
        );
        let update = extract(&html).unwrap();
        assert_eq!(update.price, Some(9_990));
        assert_eq!(update.vat, None);
        assert_eq!(update.image_url, None);
    }

    #[test]
    fn missing_price_is_an_error() {
        let html = detail_html("<h1 id=\"ad-title\">Golf</h1>");
        assert_eq!(extract(&html).unwrap_err(), ExtractionError::MissingPrice);
    }

    #[test]
    fn unexpected_layout_is_empty() {
        let update = extract("<html><body><div class=\"consent\">Accept</div></body></html>").unwrap();
        assert!(update.is_empty());
    }
}
