use crate::error::AppError;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const REFRESH_INTERVAL_MS: u64 = 30_000;
pub const CACHE_WINDOW_SECS: u64 = 60;
pub const FAILURE_CACHE_WINDOW_SECS: u64 = 5;
pub const MARKET_PAGE_SIZE: u16 = 100;
pub const VS_CURRENCY: &str = "usd";
pub const MAX_SPARKLINE_POINTS: usize = 168;
pub const FAVORITES_STORAGE_KEY: &str = "crypto-favorites";
pub const DEFAULT_SORT_KEY: SortKey = SortKey::MarketCap;
pub const DEFAULT_SORT_DIRECTION: SortDirection = SortDirection::Descending;

/// One row of the dashboard table. Every numeric field is finite; upstream
/// nulls are coerced at the gateway boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image_url: String,
    pub current_price: f64,
    pub price_change_24h: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub circulating_supply: f64,
    pub sparkline: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawAssetWire {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub sparkline_in_7d: Option<RawSparklineWire>,
}

#[derive(Debug, Deserialize)]
pub struct RawSparklineWire {
    pub price: Option<Vec<SparklinePointWire>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SparklinePointWire {
    Price(f64),
    Other(IgnoredAny),
}

fn required_identity(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| AppError::InvalidArgument(format!("market record is missing '{field}'")))
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|number| number.is_finite()).unwrap_or(0.0)
}

fn non_negative_or_zero(value: Option<f64>) -> f64 {
    finite_or_zero(value).max(0.0)
}

fn normalize_sparkline(raw: Option<RawSparklineWire>) -> Vec<f64> {
    let mut points: Vec<f64> = raw
        .and_then(|sparkline| sparkline.price)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|point| match point {
            SparklinePointWire::Price(price) if price.is_finite() => Some(price),
            _ => None,
        })
        .collect();

    if points.len() > MAX_SPARKLINE_POINTS {
        let overflow = points.len() - MAX_SPARKLINE_POINTS;
        points.drain(0..overflow);
    }
    points
}

impl TryFrom<RawAssetWire> for AssetRecord {
    type Error = AppError;

    fn try_from(value: RawAssetWire) -> Result<Self, Self::Error> {
        Ok(Self {
            id: required_identity(value.id, "id")?,
            symbol: required_identity(value.symbol, "symbol")?,
            name: required_identity(value.name, "name")?,
            image_url: value.image.unwrap_or_default(),
            current_price: non_negative_or_zero(value.current_price),
            price_change_24h: finite_or_zero(value.price_change_percentage_24h),
            market_cap: non_negative_or_zero(value.market_cap),
            volume_24h: non_negative_or_zero(value.total_volume),
            circulating_supply: non_negative_or_zero(value.circulating_supply),
            sparkline: normalize_sparkline(value.sparkline_in_7d),
        })
    }
}

/// Decodes an upstream markets payload item by item. A payload that is not a
/// JSON array fails as a whole; items that do not decode or lack identity
/// fields are skipped.
pub fn parse_markets_payload(payload: &mut [u8]) -> Result<Vec<AssetRecord>, AppError> {
    let items: Vec<simd_json::OwnedValue> = simd_json::serde::from_slice(payload)?;
    let total = items.len();

    let mut records = Vec::with_capacity(total);
    for item in items {
        let wire = match simd_json::serde::from_owned_value::<RawAssetWire>(item) {
            Ok(wire) => wire,
            Err(error) => {
                tracing::debug!(%error, "dropping undecodable market record");
                continue;
            }
        };
        match AssetRecord::try_from(wire) {
            Ok(record) => records.push(record),
            Err(error) => tracing::debug!(%error, "dropping market record"),
        }
    }

    if records.len() < total {
        tracing::debug!(kept = records.len(), total, "normalized market payload");
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Name,
    Symbol,
    CurrentPrice,
    PriceChange24h,
    MarketCap,
    Volume24h,
    CirculatingSupply,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Symbol => "symbol",
            Self::CurrentPrice => "currentPrice",
            Self::PriceChange24h => "priceChange24h",
            Self::MarketCap => "marketCap",
            Self::Volume24h => "volume24h",
            Self::CirculatingSupply => "circulatingSupply",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value {
            "name" => Ok(Self::Name),
            "symbol" => Ok(Self::Symbol),
            "currentPrice" => Ok(Self::CurrentPrice),
            "priceChange24h" => Ok(Self::PriceChange24h),
            "marketCap" => Ok(Self::MarketCap),
            "volume24h" => Ok(Self::Volume24h),
            "circulatingSupply" => Ok(Self::CirculatingSupply),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported sort key '{other}'"
            ))),
        }
    }

    /// Direction applied when this column becomes the active one.
    pub fn initial_direction(self) -> SortDirection {
        match self {
            Self::MarketCap | Self::Volume24h => SortDirection::Descending,
            _ => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub key: Option<SortKey>,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            key: Some(DEFAULT_SORT_KEY),
            direction: DEFAULT_SORT_DIRECTION,
        }
    }
}

impl SortConfig {
    pub fn unsorted() -> Self {
        Self {
            key: None,
            direction: SortDirection::Descending,
        }
    }

    /// Column-header click: same column flips direction, a new column starts
    /// at its conventional direction.
    pub fn clicked(self, key: SortKey) -> Self {
        if self.key == Some(key) {
            Self {
                key: Some(key),
                direction: self.direction.toggled(),
            }
        } else {
            Self {
                key: Some(key),
                direction: key.initial_direction(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DashboardPhase {
    Initial,
    Loading,
    Ready,
    RefreshFailed,
    Empty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub phase: DashboardPhase,
    pub error: Option<String>,
    pub sort: SortConfig,
    pub search_term: String,
    pub favorites: BTreeSet<String>,
    pub last_updated_at_ms: Option<i64>,
    pub total_assets: usize,
    pub rows: Vec<AssetRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortColumnArgs {
    pub key: Option<String>,
}

impl SortColumnArgs {
    pub fn normalize(self) -> Result<Option<SortKey>, AppError> {
        match self.key {
            None => Ok(None),
            Some(raw) => SortKey::parse_str(raw.trim()).map(Some),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchTermArgs {
    #[serde(default)]
    pub term: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<AssetRecord> {
        let mut payload = json.as_bytes().to_vec();
        parse_markets_payload(&mut payload).expect("payload should parse")
    }

    #[test]
    fn coerces_null_numbers_and_drops_null_sparkline_points() {
        let records = parse(
            r#"[{"id":"btc","symbol":"btc","name":"Bitcoin","current_price":null,"market_cap":900000000000,"sparkline_in_7d":{"price":[1,2,null,4]}}]"#,
        );

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "btc");
        assert_eq!(record.symbol, "btc");
        assert_eq!(record.name, "Bitcoin");
        assert_eq!(record.current_price, 0.0);
        assert_eq!(record.market_cap, 900_000_000_000.0);
        assert_eq!(record.sparkline, vec![1.0, 2.0, 4.0]);
        assert_eq!(record.volume_24h, 0.0);
        assert_eq!(record.circulating_supply, 0.0);
        assert_eq!(record.price_change_24h, 0.0);
        assert_eq!(record.image_url, "");
    }

    #[test]
    fn drops_items_missing_identity_fields() {
        let records = parse(
            r#"[
                {"id":"eth","symbol":"eth","name":"Ethereum"},
                {"symbol":"xrp","name":"XRP"},
                {"id":"sol","name":"Solana"},
                {"id":"ada","symbol":"ada","name":""},
                {"id":"doge","symbol":"doge","name":null}
            ]"#,
        );

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["eth"]);
    }

    #[test]
    fn drops_items_with_wrongly_typed_fields_but_keeps_the_rest() {
        let records = parse(
            r#"[
                {"id":"eth","symbol":"eth","name":"Ethereum","current_price":"not-a-number"},
                {"id":"btc","symbol":"btc","name":"Bitcoin","current_price":64000.5}
            ]"#,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "btc");
        assert_eq!(records[0].current_price, 64_000.5);
    }

    #[test]
    fn rejects_payloads_that_are_not_arrays() {
        let mut payload = br#"{"status":{"error_code":429}}"#.to_vec();
        assert!(parse_markets_payload(&mut payload).is_err());

        let mut broken = b"<html>rate limited</html>".to_vec();
        assert!(parse_markets_payload(&mut broken).is_err());
    }

    #[test]
    fn keeps_signed_percentage_and_clamps_negative_magnitudes() {
        let records = parse(
            r#"[{"id":"eth","symbol":"eth","name":"Ethereum","price_change_percentage_24h":-3.25,"total_volume":-5,"circulating_supply":120000000}]"#,
        );

        assert_eq!(records[0].price_change_24h, -3.25);
        assert_eq!(records[0].volume_24h, 0.0);
        assert_eq!(records[0].circulating_supply, 120_000_000.0);
    }

    #[test]
    fn keeps_the_most_recent_sparkline_samples() {
        let prices: Vec<String> = (0..200).map(|index| index.to_string()).collect();
        let json = format!(
            r#"[{{"id":"btc","symbol":"btc","name":"Bitcoin","sparkline_in_7d":{{"price":[{}]}}}}]"#,
            prices.join(",")
        );
        let records = parse(&json);

        let sparkline = &records[0].sparkline;
        assert_eq!(sparkline.len(), MAX_SPARKLINE_POINTS);
        assert_eq!(sparkline.first().copied(), Some(32.0));
        assert_eq!(sparkline.last().copied(), Some(199.0));
    }

    #[test]
    fn missing_sparkline_becomes_empty() {
        let records = parse(
            r#"[{"id":"btc","symbol":"btc","name":"Bitcoin","sparkline_in_7d":null},{"id":"eth","symbol":"eth","name":"Ethereum","sparkline_in_7d":{"price":null}}]"#,
        );

        assert!(records.iter().all(|record| record.sparkline.is_empty()));
    }

    #[test]
    fn clicking_active_column_toggles_direction() {
        let config = SortConfig::default().clicked(SortKey::MarketCap);
        assert_eq!(
            config,
            SortConfig {
                key: Some(SortKey::MarketCap),
                direction: SortDirection::Ascending,
            }
        );
    }

    #[test]
    fn clicking_new_column_uses_conventional_direction() {
        let by_name = SortConfig::default().clicked(SortKey::Name);
        assert_eq!(
            by_name,
            SortConfig {
                key: Some(SortKey::Name),
                direction: SortDirection::Ascending,
            }
        );

        let by_volume = by_name.clicked(SortKey::Volume24h);
        assert_eq!(by_volume.direction, SortDirection::Descending);

        let by_price = by_volume.clicked(SortKey::CurrentPrice);
        assert_eq!(by_price.direction, SortDirection::Ascending);
    }

    #[test]
    fn sort_keys_round_trip_through_their_names() {
        for key in [
            SortKey::Name,
            SortKey::Symbol,
            SortKey::CurrentPrice,
            SortKey::PriceChange24h,
            SortKey::MarketCap,
            SortKey::Volume24h,
            SortKey::CirculatingSupply,
        ] {
            assert_eq!(SortKey::parse_str(key.as_str()).ok(), Some(key));
        }
        assert!(SortKey::parse_str("sparkline").is_err());
    }

    #[test]
    fn null_sort_column_args_select_no_key() {
        let args = SortColumnArgs { key: None };
        assert_eq!(args.normalize().ok(), Some(None));
    }
}
