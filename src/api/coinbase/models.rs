use serde::Deserialize;

use crate::api::validate_rate;
use crate::utils::errors::SourceError;

/// Body of `GET /v2/prices/BTC-USD/spot`
#[derive(Debug, Clone, Deserialize)]
pub struct SpotPriceResponse {
    pub data: SpotPrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotPrice {
    /// Decimal string, e.g. "67123.45"
    pub amount: String,
    pub currency: String,
}

/// Extract the USD rate from a spot price body
pub fn parse_spot_price(body: &serde_json::Value) -> Result<f64, SourceError> {
    let parsed: SpotPriceResponse = serde_json::from_value(body.clone())
        .map_err(|e| SourceError::Validation(format!("Unexpected response shape: {}", e)))?;

    if !parsed.data.currency.eq_ignore_ascii_case("USD") {
        return Err(SourceError::Validation(format!(
            "Expected USD quote, got {}",
            parsed.data.currency
        )));
    }

    let rate = parsed
        .data
        .amount
        .trim()
        .parse::<f64>()
        .map_err(|_| SourceError::Validation(format!("'{}' is not a number", parsed.data.amount)))?;

    validate_rate(rate)
}
