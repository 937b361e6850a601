use crate::error::AppError;
use crate::market::types::{parse_markets_payload, AssetRecord, MARKET_PAGE_SIZE, VS_CURRENCY};
use reqwest::Client;
use std::time::Duration;

pub const COINGECKO_REST_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const REQUEST_TIMEOUT_MS: u64 = 10_000;

pub fn markets_endpoint(base_url: &str) -> String {
    format!("{}/coins/markets", base_url.trim_end_matches('/'))
        + &format!(
            "?vs_currency={VS_CURRENCY}&order=market_cap_desc&per_page={MARKET_PAGE_SIZE}&page=1&sparkline=true&price_change_percentage=24h"
        )
}

pub fn build_http_client() -> Result<Client, AppError> {
    let client = Client::builder()
        .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Single upstream round trip. Non-success statuses and undecodable bodies
/// are errors; individually malformed records are dropped by the parser.
pub async fn fetch_market_assets(
    client: &Client,
    endpoint: &str,
) -> Result<Vec<AssetRecord>, AppError> {
    let response = client
        .get(endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Upstream(format!(
            "market data request returned status {status}"
        )));
    }

    let mut payload = response.bytes().await?.to_vec();
    parse_markets_payload(payload.as_mut_slice())
        .map_err(|error| AppError::Upstream(format!("undecodable market payload: {error}")))
}
