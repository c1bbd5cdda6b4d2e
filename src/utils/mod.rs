pub mod backoff;
pub mod config;
pub mod errors;
pub mod format;

pub use backoff::Backoff;
pub use config::Config;
pub use errors::extract_clean_error;
