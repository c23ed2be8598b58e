//! Field-level cleanup shared by the listing and detail extractors.
//! Every function here degrades to `None`/empty instead of failing.

use regex::Regex;
use scraper::ElementRef;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static RESOLUTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$_\d+").expect("valid resolution regex"));

/// Integer made of the digit characters of `text`
pub fn digits(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// VAT percentage from text like "19% VAT" or "Net 19,00 %"
pub fn parse_vat(text: &str) -> Option<u8> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let number = kept.trim_matches(|c| c == ',' || c == '.').replace(',', ".");
    let vat = number.parse::<f64>().ok()?.round_ties_even();
    (0.0..=100.0).contains(&vat).then_some(vat as u8)
}

/// Text of an element with runs of whitespace collapsed
pub fn collapsed_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Markup-free text of a block: text nodes joined by single spaces,
/// compatibility-decomposed with combining marks removed.
pub fn plain_text(element: ElementRef<'_>) -> String {
    let joined = element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let decomposed: String = joined.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    collapse_whitespace(&decomposed)
}

/// Image URL of an `img` element: `src`, else `data-src`, normalised.
pub fn image_url(img: ElementRef<'_>) -> Option<String> {
    let value = img.value();
    let raw = value
        .attr("src")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| value.attr("data-src").filter(|s| !s.trim().is_empty()))?;
    Some(normalize_image_url(raw.trim()))
}

/// Make protocol-relative URLs absolute and ask for the large rendition
pub fn normalize_image_url(raw: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    RESOLUTION_TOKEN.replace_all(&absolute, "$$_10").into_owned()
}
