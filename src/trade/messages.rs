use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::config::NS_PER_SEC;
use crate::types::ItemFlags;

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Request body for `POST /api/{trade}/search/{league}`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: SearchQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub status: StatusFilter,
    #[serde(rename = "type")]
    pub base_type: String,
    pub stats: Vec<StatGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusFilter {
    pub option: String,
}

/// One stat filter group. Callers may fill `filters`; collection sends it empty.
#[derive(Debug, Clone, Serialize)]
pub struct StatGroup {
    #[serde(rename = "type")]
    pub group_type: String,
    pub filters: Vec<serde_json::Value>,
}

impl SearchRequest {
    /// Online listings of one base type, no stat constraints.
    pub fn online_base_type(base_type: &str) -> Self {
        Self {
            query: SearchQuery {
                status: StatusFilter { option: "online".to_string() },
                base_type: base_type.to_string(),
                stats: vec![StatGroup { group_type: "and".to_string(), filters: Vec::new() }],
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub id: String,
    #[serde(default)]
    pub result: Vec<String>,
    /// Total matches reported by the marketplace; usually larger than `result`.
    #[serde(default)]
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FetchResponse {
    /// Decoded entry by entry so one bad listing cannot sink the batch.
    #[serde(default)]
    pub result: Vec<serde_json::Value>,
}

impl FetchResponse {
    pub fn into_listings(self) -> Vec<RawListing> {
        self.result.into_iter().filter_map(RawListing::from_entry).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawListing {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub listing: RawListingInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub item: RawItem,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListingInfo {
    pub indexed: Option<String>,
    pub account: Option<RawAccount>,
    pub price: Option<RawPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPrice {
    /// Number on the wire, occasionally a numeric string.
    pub amount: Option<serde_json::Value>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub base_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ilvl: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub explicit_mods: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub implicit_mods: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub influences: BTreeMap<String, bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub corrupted: bool,
    /// Mirrored items are reported as "duplicated".
    #[serde(default, deserialize_with = "null_as_default")]
    pub duplicated: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fractured: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub synthesised: bool,
    pub extended: Option<RawExtended>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExtended {
    pub category: Option<String>,
}

// ---------------------------------------------------------------------------
// Boundary validation
// ---------------------------------------------------------------------------

/// A listing whose shape has been checked. Everything downstream works on this.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedListing {
    pub listing_id: String,
    pub amount: f64,
    pub currency: String,
    pub base_type: String,
    pub item_class: Option<String>,
    pub item_level: Option<i64>,
    pub influences: Vec<String>,
    pub flags: ItemFlags,
    /// Implicit lines first, then explicit.
    pub mod_lines: Vec<String>,
    pub seller_account: Option<String>,
    pub listed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingPrice,
    MissingCurrency,
    MissingBaseType,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::MissingPrice => "missing_price",
            Rejection::MissingCurrency => "missing_currency",
            Rejection::MissingBaseType => "missing_base_type",
        };
        write!(f, "{s}")
    }
}

impl RawListing {
    /// Decode one fetch entry. Nulls are dropped. An entry whose shape is
    /// unreadable but whose id is known is kept as an empty listing, so the id
    /// still counts as seen and the listing is rejected at `parse`.
    pub fn from_entry(entry: serde_json::Value) -> Option<RawListing> {
        if entry.is_null() {
            return None;
        }
        let id = entry.get("id").and_then(|v| v.as_str()).map(str::to_string);
        match serde_json::from_value::<RawListing>(entry) {
            Ok(listing) => Some(listing),
            Err(e) => {
                debug!(listing_id = id.as_deref().unwrap_or("<none>"), "Unreadable fetch entry: {e}");
                id.map(|id| RawListing { id, listing: RawListingInfo::default(), item: RawItem::default() })
            }
        }
    }

    pub fn parse(self) -> std::result::Result<ParsedListing, Rejection> {
        let price = self.listing.price.as_ref().ok_or(Rejection::MissingPrice)?;
        let amount = price
            .amount
            .as_ref()
            .and_then(|a| a.as_f64().or_else(|| a.as_str().and_then(|s| s.trim().parse().ok())))
            .filter(|a| a.is_finite())
            .ok_or(Rejection::MissingPrice)?;
        let currency = price
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(Rejection::MissingCurrency)?
            .to_string();

        let item = self.item;
        let base_type = item
            .base_type
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(Rejection::MissingBaseType)?
            .to_string();

        let influences = item
            .influences
            .iter()
            .filter(|(_, present)| **present)
            .map(|(name, _)| name.clone())
            .collect();

        let mut mod_lines = item.implicit_mods;
        mod_lines.extend(item.explicit_mods);

        Ok(ParsedListing {
            listing_id: self.id,
            amount,
            currency,
            base_type,
            item_class: item.extended.and_then(|e| e.category),
            item_level: item.ilvl,
            influences,
            flags: ItemFlags {
                corrupted: item.corrupted,
                mirrored: item.duplicated,
                fractured: item.fractured,
                synthesised: item.synthesised,
            },
            mod_lines,
            seller_account: self.listing.account.and_then(|a| a.name),
            listed_at: self
                .listing
                .indexed
                .as_deref()
                .and_then(parse_iso_to_unix_secs)
                .map(|secs| secs as i64 * NS_PER_SEC),
        })
    }
}

fn null_as_default<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Integers, integral floats and numeric strings; anything else is None.
fn lenient_i64<'de, D>(d: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15).map(|f| f as i64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    }))
}

/// Parse an RFC 3339 / ISO 8601 UTC timestamp string to Unix seconds.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    let s = match s.as_bytes().get(19) {
        Some(b'+') | Some(b'-') => s.get(..19)?,
        _ => s,
    };
    let (year, month, day, hour, minute, second): (i64, i64, i64, i64, i64, i64) =
        if s.len() == 10 {
            (s.get(0..4)?.parse().ok()?, s.get(5..7)?.parse().ok()?, s.get(8..10)?.parse().ok()?, 0, 0, 0)
        } else if s.len() >= 19 {
            (s.get(0..4)?.parse().ok()?, s.get(5..7)?.parse().ok()?, s.get(8..10)?.parse().ok()?,
             s.get(11..13)?.parse().ok()?, s.get(14..16)?.parse().ok()?, s.get(17..19)?.parse().ok()?)
        } else {
            return None;
        };

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let unix_days = jdn - 2_440_588;
    Some((unix_days * 86400 + hour * 3600 + minute * 60 + second) as f64)
}

#[cfg(test)]
pub(crate) fn raw_listing_json(id: &str, amount: serde_json::Value, currency: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "listing": {
            "indexed": "2024-03-01T12:00:00Z",
            "account": { "name": "seller_one" },
            "price": { "type": "~price", "amount": amount, "currency": currency }
        },
        "item": {
            "baseType": "Hubris Circlet",
            "ilvl": 86,
            "implicitMods": [],
            "explicitMods": ["+75 to maximum Life", "Adds 1 to 2 Physical Damage to Attacks"],
            "influences": { "shaper": true, "elder": false },
            "corrupted": true,
            "extended": { "category": "armour" }
        }
    })
}
