use serde_json::Value;

use crate::api::validate_rate;
use crate::utils::errors::SourceError;

/// CoinGecko asset id for bitcoin
pub const ASSET_ID: &str = "bitcoin";

/// Quote currency requested from `/simple/price`
pub const VS_CURRENCY: &str = "usd";

/// Extract the USD rate from a `/simple/price` body.
///
/// Expected shape: `{ "bitcoin": { "usd": 12345.6 } }`
pub fn parse_simple_price(body: &Value) -> Result<f64, SourceError> {
    let asset = body
        .get(ASSET_ID)
        .ok_or_else(|| SourceError::Validation(format!("'{}' missing in response", ASSET_ID)))?;

    let rate = asset
        .get(VS_CURRENCY)
        .ok_or_else(|| SourceError::Validation(format!("'{}' missing for {}", VS_CURRENCY, ASSET_ID)))?
        .as_f64()
        .ok_or_else(|| SourceError::Validation(format!("'{}' is not a number", VS_CURRENCY)))?;

    validate_rate(rate)
}
