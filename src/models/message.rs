//! Wire messages exchanged between the page and the background process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::RateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "PRICE_REQUEST")]
    PriceRequest,
    #[serde(rename = "PRICE_RESPONSE")]
    PriceResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Request for the current rate snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PriceRequest {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            kind: MessageType::PriceRequest,
            timestamp: Utc::now(),
        }
    }
}

/// Error payload carried by an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    pub code: String,
}

/// Reply to a [`PriceRequest`], correlated by `request_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RateSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PriceResponse {
    pub fn success(request_id: String, data: RateSnapshot) -> Self {
        Self {
            request_id,
            kind: MessageType::PriceResponse,
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(request_id: String, code: &str, message: impl Into<String>) -> Self {
        Self {
            request_id,
            kind: MessageType::PriceResponse,
            status: ResponseStatus::Error,
            data: None,
            error: Some(ResponseError {
                message: message.into(),
                code: code.to_string(),
            }),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = PriceRequest::new("abc".to_string());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["requestId"], "abc");
        assert_eq!(value["type"], "PRICE_REQUEST");
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_error_response_omits_data() {
        let response = PriceResponse::error("abc".to_string(), "FETCH_FAILED", "down");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "PRICE_RESPONSE");
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "FETCH_FAILED");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_request_without_type_is_rejected() {
        let value = serde_json::json!({ "requestId": "abc", "timestamp": 0 });
        assert!(serde_json::from_value::<PriceRequest>(value).is_err());
    }
}
