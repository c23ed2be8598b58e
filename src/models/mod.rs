use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Primary key of a stored search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub i64);

/// External id of an ad, as assigned by the source site
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub i64);

/// Identity of a notification recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of one query-string field after collapsing repeated keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    /// All raw values in stored order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            ParamValue::Single(v) => std::slice::from_ref(v),
            ParamValue::Multi(vs) => vs.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Single(value.to_string())
    }
}

/// Canonical parameters of a query, keyed by field name
pub type Parameters = BTreeMap<String, ParamValue>;

/// A stored, parameterized listing search that users monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: QueryId,
    pub root_url: String,
    pub name: String,
    pub parameters: Parameters,
    pub subscribers: BTreeSet<SubscriberId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for creating a search query
#[derive(Debug, Clone)]
pub struct NewSearchQuery {
    pub name: String,
    pub parameters: Parameters,
    pub subscribers: BTreeSet<SubscriberId>,
}

/// One ad card as read off a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct RawAd {
    pub site_id: SiteId,
    pub name: String,
    pub date: Option<DateTime<Utc>>,
    pub price: Option<i64>,
    pub vat: Option<u8>,
    pub description: String,
    pub image_url: String,
}

/// Persisted snapshot of one listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRecord {
    pub site_id: SiteId,
    pub name: String,
    pub price: Option<i64>,
    pub vat: Option<u8>,
    pub date: Option<DateTime<Utc>>,
    pub description: String,
    pub image_url: String,
    pub queries: BTreeSet<QueryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdRecord {
    /// Build a fresh record from a listing card. Links are added by the store.
    pub fn from_raw(raw: RawAd, now: DateTime<Utc>) -> Self {
        Self {
            site_id: raw.site_id,
            name: raw.name,
            price: raw.price,
            vat: raw.vat,
            date: raw.date,
            description: raw.description,
            image_url: raw.image_url,
            queries: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Price with VAT removed, rounded up. Only defined when both parts are
    /// known and the price is small enough to scale.
    pub fn price_net(&self) -> Option<i64> {
        let price = self.price?;
        let vat = i64::from(self.vat?);
        let scaled = price.checked_mul(100 - vat)?;
        Some(scaled.div_euclid(100) + i64::from(scaled.rem_euclid(100) != 0))
    }

    /// Apply a detail-page update; absent fields are left as they are.
    pub fn apply(&mut self, update: &AdUpdate, now: DateTime<Utc>) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(price) = update.price {
            self.price = Some(price);
        }
        if let Some(vat) = update.vat {
            self.vat = Some(vat);
        }
        if let Some(image_url) = &update.image_url {
            self.image_url = image_url.clone();
        }
        self.updated_at = now;
    }
}

/// Partial field update read off an ad detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdUpdate {
    pub name: Option<String>,
    pub price: Option<i64>,
    pub vat: Option<u8>,
    pub image_url: Option<String>,
}

impl AdUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.vat.is_none() && self.image_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: Option<i64>, vat: Option<u8>) -> AdRecord {
        AdRecord {
            site_id: SiteId(1),
            name: "Golf".to_string(),
            price,
            vat,
            date: None,
            description: String::new(),
            image_url: String::new(),
            queries: BTreeSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn price_net_rounds_up() {
        assert_eq!(record(Some(100), Some(19)).price_net(), Some(81));
        assert_eq!(record(Some(119), Some(19)).price_net(), Some(97));
        assert_eq!(record(Some(10_500), Some(0)).price_net(), Some(10_500));
    }

    #[test]
    fn price_net_of_absurd_price_is_undefined() {
        let price = crate::scrapers::fields::digits("€ 999.999.999.999.999.999");
        assert_eq!(price, Some(999_999_999_999_999_999));
        assert_eq!(record(price, Some(19)).price_net(), None);
        assert_eq!(record(Some(i64::MAX), Some(0)).price_net(), None);
        assert_eq!(record(Some(i64::MAX / 100), Some(0)).price_net(), Some(i64::MAX / 100));
    }

    #[test]
    fn price_net_needs_both_parts() {
        assert_eq!(record(Some(100), None).price_net(), None);
        assert_eq!(record(None, Some(19)).price_net(), None);
    }

    #[test]
    fn apply_leaves_absent_fields() {
        let mut ad = record(Some(100), Some(19));
        ad.image_url = "https://img/a.jpg".to_string();
        let update = AdUpdate {
            price: Some(90),
            ..Default::default()
        };
        ad.apply(&update, Utc::now());
        assert_eq!(ad.price, Some(90));
        assert_eq!(ad.vat, Some(19));
        assert_eq!(ad.name, "Golf");
        assert_eq!(ad.image_url, "https://img/a.jpg");
    }

    #[test]
    fn param_values_serialize_untagged() {
        let mut params = Parameters::new();
        params.insert("maxPrice".to_string(), "10500".into());
        params.insert(
            "fuels".to_string(),
            ParamValue::Multi(vec!["DIESEL".to_string(), "PETROL".to_string()]),
        );
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"fuels": ["DIESEL", "PETROL"], "maxPrice": "10500"})
        );
        let back: Parameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }
}
