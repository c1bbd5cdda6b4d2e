//! Data models shared by the background and page halves
//!
//! Each model is either persisted by the rate cache or carried across the
//! message bus as JSON.

pub mod cache;
pub mod message;
pub mod snapshot;

// Re-export commonly used types for convenience
pub use cache::{CacheEntry, CACHE_KEY, CACHE_SCHEMA_VERSION};
pub use message::{MessageType, PriceRequest, PriceResponse, ResponseError, ResponseStatus};
pub use snapshot::{RateSnapshot, EMERGENCY_SOURCE, SATS_PER_BTC};
