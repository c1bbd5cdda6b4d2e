//! satlens: annotates USD amounts in page text with their bitcoin value
//!
//! The background half ([`services::cache_service`], [`services::scheduler_service`])
//! owns the exchange rate. The page half ([`services::page_service`]) asks for it over
//! the [`bus`], annotates the document and keeps watching it for new content.

pub mod api;
pub mod bus;
pub mod commands;
pub mod db;
pub mod dom;
pub mod models;
pub mod services;
pub mod utils;
