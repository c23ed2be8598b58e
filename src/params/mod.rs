//! Query-string model: which parameters a query kind accepts, how a
//! submitted URL collapses into canonical parameters, and how request
//! URLs are rebuilt from them.

mod fields;

use std::collections::BTreeMap;
use url::Url;

use crate::error::ValidationError;
use crate::models::{ParamValue, Parameters, SiteId};

pub use fields::{DETAIL_ONLY_SINGLE_FIELDS, SEARCH_MULTI_FIELDS, SEARCH_SINGLE_FIELDS};

/// Listing page cursor, appended per page by the crawler
pub const PAGE_NUMBER_FIELD: &str = "pageNumber";

/// The two kinds of URL the crawler builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    ListingSearch,
    AdDetail,
}

/// Static parameter rules of one query kind
#[derive(Debug)]
pub struct QuerySchema {
    root_url: &'static str,
    single_fields: &'static [&'static [&'static str]],
    multi_fields: &'static [&'static str],
    overrides: &'static [(&'static str, &'static str)],
    excluded: &'static [&'static str],
}

static LISTING_SEARCH: QuerySchema = QuerySchema {
    root_url: "https://suchen.mobile.de/fahrzeuge/search.html",
    single_fields: &[SEARCH_SINGLE_FIELDS],
    multi_fields: SEARCH_MULTI_FIELDS,
    overrides: &[("isSearchRequest", "true"), ("lang", "en")],
    excluded: &[PAGE_NUMBER_FIELD],
};

static AD_DETAIL: QuerySchema = QuerySchema {
    root_url: "https://suchen.mobile.de/fahrzeuge/details.html",
    single_fields: &[DETAIL_ONLY_SINGLE_FIELDS, SEARCH_SINGLE_FIELDS],
    multi_fields: SEARCH_MULTI_FIELDS,
    overrides: &[("lang", "en")],
    excluded: &[],
};

impl QueryKind {
    pub fn schema(self) -> &'static QuerySchema {
        match self {
            QueryKind::ListingSearch => &LISTING_SEARCH,
            QueryKind::AdDetail => &AD_DETAIL,
        }
    }
}

impl QuerySchema {
    pub fn root_url(&self) -> &'static str {
        self.root_url
    }

    fn root(&self) -> Url {
        Url::parse(self.root_url).expect("schema root is an absolute URL")
    }

    pub fn is_single(&self, field: &str) -> bool {
        self.single_fields.iter().any(|group| group.contains(&field))
    }

    pub fn is_multi(&self, field: &str) -> bool {
        self.multi_fields.contains(&field)
    }

    pub fn is_allowed(&self, field: &str) -> bool {
        self.is_single(field) || self.is_multi(field)
    }

    pub fn is_excluded(&self, field: &str) -> bool {
        self.excluded.contains(&field)
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.overrides.iter().copied()
    }

    fn is_overridden(&self, field: &str) -> bool {
        self.overrides.iter().any(|(key, _)| *key == field)
    }

    /// Stored parameters merged with overrides and stripped of excluded fields
    fn effective(&self, parameters: &Parameters) -> Parameters {
        let mut merged = parameters.clone();
        for (key, value) in self.overrides() {
            merged.insert(key.to_string(), ParamValue::from(value));
        }
        merged.retain(|key, _| !self.is_excluded(key));
        merged
    }

    fn compose(&self, parameters: &Parameters, extra: &[(&str, String)]) -> Url {
        let mut url = self.root();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.effective(parameters) {
                for v in value.values() {
                    pairs.append_pair(key, v);
                }
            }
            for (key, v) in extra {
                pairs.append_pair(key, v);
            }
        }
        url
    }
}

/// Collapse the query string of `url`: one value stays scalar, repeated
/// keys become an ordered list.
pub fn collapse_query(url: &Url) -> Parameters {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        grouped.entry(key.into_owned()).or_default().push(value.into_owned());
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                ParamValue::Single(values.remove(0))
            } else {
                ParamValue::Multi(values)
            };
            (key, value)
        })
        .collect()
}

/// Parse a user-submitted URL into the canonical parameters of `kind`.
///
/// Excluded and overridden fields are dropped from the result; `build_url`
/// puts the overrides back.
pub fn validate_and_canonicalize(
    raw_url: &str,
    kind: QueryKind,
) -> Result<Parameters, ValidationError> {
    let schema = kind.schema();
    let url = Url::parse(raw_url.trim()).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    let mut parameters = collapse_query(&url);

    if url.origin() != schema.root().origin() {
        return Err(ValidationError::OriginMismatch);
    }

    for (key, value) in &parameters {
        if !schema.is_allowed(key) {
            return Err(ValidationError::NotAllowed(key.clone()));
        }
        if schema.is_single(key) && matches!(value, ParamValue::Multi(_)) {
            return Err(ValidationError::MustBeSingle(key.clone()));
        }
    }

    parameters.retain(|key, _| !schema.is_excluded(key) && !schema.is_overridden(key));
    Ok(parameters)
}

/// Final request URL of `kind` for the given stored parameters
pub fn build_url(parameters: &Parameters, kind: QueryKind) -> String {
    kind.schema().compose(parameters, &[]).into()
}

/// URL of one page of a listing search
pub fn listing_page_url(parameters: &Parameters, page: u32) -> String {
    QueryKind::ListingSearch
        .schema()
        .compose(parameters, &[(PAGE_NUMBER_FIELD, page.to_string())])
        .into()
}

/// Detail page URL of one ad
pub fn ad_detail_url(site_id: SiteId) -> String {
    let mut parameters = Parameters::new();
    parameters.insert("id".to_string(), ParamValue::Single(site_id.0.to_string()));
    build_url(&parameters, QueryKind::AdDetail)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH: &str = "https://suchen.mobile.de/fahrzeuge/search.html\
        ?damageUnrepaired=NO_DAMAGE_UNREPAIRED&features=ELECTRIC_HEATED_SEATS\
        &features=MULTIFUNCTIONAL_WHEEL&fuels=DIESEL&isSearchRequest=true\
        &makeModelVariant1.makeId=25200&maxPrice=10500&pageNumber=3\
        &sortOption.sortBy=creationTime";

    fn single(v: &str) -> ParamValue {
        ParamValue::Single(v.to_string())
    }

    #[test]
    fn collapses_repeated_keys_into_lists() {
        let params = validate_and_canonicalize(SEARCH, QueryKind::ListingSearch).unwrap();

        assert_eq!(
            params.get("features"),
            Some(&ParamValue::Multi(vec![
                "ELECTRIC_HEATED_SEATS".to_string(),
                "MULTIFUNCTIONAL_WHEEL".to_string(),
            ]))
        );
        // a multi-valued field seen once stays scalar
        assert_eq!(params.get("fuels"), Some(&single("DIESEL")));
        assert_eq!(params.get("maxPrice"), Some(&single("10500")));
    }

    #[test]
    fn drops_excluded_and_overridden_fields() {
        let params = validate_and_canonicalize(SEARCH, QueryKind::ListingSearch).unwrap();
        assert!(!params.contains_key("pageNumber"));
        assert!(!params.contains_key("isSearchRequest"));
    }

    #[test]
    fn rejects_foreign_origin() {
        let err = validate_and_canonicalize(
            "https://www.autoscout24.de/lst?maxPrice=1",
            QueryKind::ListingSearch,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::OriginMismatch);
        assert_eq!(err.to_string(), "URL origin must match root URL.");
    }

    #[test]
    fn rejects_unknown_parameter() {
        let err = validate_and_canonicalize(
            "https://suchen.mobile.de/fahrzeuge/search.html?maxPrice=1&color=red",
            QueryKind::ListingSearch,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NotAllowed("color".to_string()));
        assert_eq!(err.to_string(), "Parameter \"color\" is not allowed.");
    }

    #[test]
    fn rejects_single_field_given_twice() {
        let err = validate_and_canonicalize(
            "https://suchen.mobile.de/fahrzeuge/search.html?maxPrice=1&maxPrice=2",
            QueryKind::ListingSearch,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MustBeSingle("maxPrice".to_string()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            validate_and_canonicalize("not a url", QueryKind::ListingSearch),
            Err(ValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn detail_kind_accepts_detail_only_fields() {
        let url = "https://suchen.mobile.de/fahrzeuge/details.html?id=325812345&searchId=abc&fuels=DIESEL";
        let params = validate_and_canonicalize(url, QueryKind::AdDetail).unwrap();
        assert_eq!(params.get("id"), Some(&single("325812345")));

        let err = validate_and_canonicalize(
            "https://suchen.mobile.de/fahrzeuge/search.html?id=1",
            QueryKind::ListingSearch,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NotAllowed("id".to_string()));
    }

    #[test]
    fn build_url_always_carries_overrides() {
        let mut params = Parameters::new();
        params.insert("lang".to_string(), single("de"));
        params.insert("isSearchRequest".to_string(), single("false"));
        params.insert("pageNumber".to_string(), single("7"));

        let built = Url::parse(&build_url(&params, QueryKind::ListingSearch)).unwrap();
        let rebuilt = collapse_query(&built);

        assert_eq!(rebuilt.get("lang"), Some(&single("en")));
        assert_eq!(rebuilt.get("isSearchRequest"), Some(&single("true")));
        assert!(!rebuilt.contains_key("pageNumber"));
        assert!(built.as_str().starts_with("https://suchen.mobile.de/fahrzeuge/search.html?"));
    }

    #[test]
    fn canonical_parameters_survive_a_rebuild() {
        let params = validate_and_canonicalize(SEARCH, QueryKind::ListingSearch).unwrap();
        let built = build_url(&params, QueryKind::ListingSearch);
        let again = validate_and_canonicalize(&built, QueryKind::ListingSearch).unwrap();
        assert_eq!(again, params);
    }

    #[test]
    fn page_url_appends_cursor() {
        let params = validate_and_canonicalize(SEARCH, QueryKind::ListingSearch).unwrap();
        let page = Url::parse(&listing_page_url(&params, 4)).unwrap();
        assert_eq!(collapse_query(&page).get("pageNumber"), Some(&single("4")));
    }

    #[test]
    fn detail_url_for_site_id() {
        assert_eq!(
            ad_detail_url(SiteId(42)),
            "https://suchen.mobile.de/fahrzeuge/details.html?id=42&lang=en"
        );
    }
}
