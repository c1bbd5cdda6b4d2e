use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::dom::Document;
use crate::models::RateSnapshot;
use crate::services::annotate_service::{AnnotationStats, Annotator, ProcessedNodeSet};
use crate::services::messaging_service::PriceClient;
use crate::services::watcher_service::MutationWatcher;
use crate::utils::config::{DisplayConfig, PageConfig};
use crate::utils::errors::ProtocolError;

/// One page with its watcher armed, annotated if a rate was available
pub struct PageSession {
    initial: AnnotationStats,
    processed: ProcessedNodeSet,
    watcher: MutationWatcher,
    load_error: Option<ProtocolError>,
}

impl PageSession {
    /// Fetch a snapshot over the protocol, annotate the whole document and
    /// start watching it.
    ///
    /// When every attempt fails the page is left untouched and the error is
    /// kept in [`PageSession::load_error`]. The watcher is armed anyway and
    /// asks for the rate again the next time the page changes.
    pub async fn load(
        client: Arc<PriceClient>,
        document: Arc<Mutex<Document>>,
        page: &PageConfig,
        display: DisplayConfig,
    ) -> Self {
        let processed = ProcessedNodeSet::new();
        let annotator = Annotator::new(processed.clone(), display);
        let mut watcher = MutationWatcher::new(document.clone(), annotator.clone(), page.debounce)
            .with_price_client(client.clone(), page.request_timeout);

        let (initial, load_error) = match request_with_retries(&client, page).await {
            Ok(snapshot) => {
                let initial = {
                    let mut doc = document.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    let root = doc.root();
                    annotator.annotate_subtree(&mut doc, root, &snapshot)
                };
                info!(
                    "✅ Page annotated: {} amounts in {} text nodes ({} boundary errors)",
                    initial.annotations, initial.text_nodes_matched, initial.boundary_errors
                );
                watcher.start(snapshot);
                (initial, None)
            }
            Err(e) => {
                warn!("Page left unannotated for now: {}", e);
                watcher.start_without_snapshot();
                (AnnotationStats::default(), Some(e))
            }
        };

        Self {
            initial,
            processed,
            watcher,
            load_error,
        }
    }

    /// The rate in use, once one has arrived
    pub fn snapshot(&self) -> Option<RateSnapshot> {
        self.watcher.snapshot()
    }

    /// Why the initial request failed, if it did
    pub fn load_error(&self) -> Option<&ProtocolError> {
        self.load_error.as_ref()
    }

    /// Stats of the full-document pass run by `load`
    pub fn initial_stats(&self) -> AnnotationStats {
        self.initial
    }

    /// Stats of every watcher pass so far
    pub fn watcher_stats(&self) -> AnnotationStats {
        self.watcher.stats()
    }

    pub fn processed(&self) -> &ProcessedNodeSet {
        &self.processed
    }

    /// Annotate later content with a newer rate
    pub fn update_snapshot(&self, snapshot: RateSnapshot) {
        self.watcher.update_snapshot(snapshot);
    }

    pub async fn close(mut self) {
        self.watcher.stop().await;
    }
}

async fn request_with_retries(client: &PriceClient, page: &PageConfig) -> Result<RateSnapshot, ProtocolError> {
    let attempts = page.retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.request_price_data(page.request_timeout).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if attempt < attempts => {
                warn!(
                    "Price request failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt,
                    attempts,
                    e,
                    page.retry_delay.as_millis()
                );
                tokio::time::sleep(page.retry_delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("Giving up on price data after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FixedRateSource;
    use crate::bus::{self, Endpoint};
    use crate::db::MemoryStore;
    use crate::dom::NodeId;
    use crate::models::PriceResponse;
    use crate::services::cache_service::RateCache;
    use crate::services::messaging_service::PriceResponder;
    use crate::utils::config::CacheConfig;
    use crate::utils::errors::codes;
    use chrono::Utc;
    use serde_json::Value;
    use std::time::Duration;

    fn page_with(text: &str) -> (Arc<Mutex<Document>>, NodeId, NodeId) {
        let mut document = Document::new();
        let root = document.root();
        let body = document.create_element("body");
        let node = document.create_text(text);
        document.append_child(body, node).unwrap();
        document.append_child(root, body).unwrap();
        (Arc::new(Mutex::new(document)), body, node)
    }

    fn page_config() -> PageConfig {
        PageConfig {
            request_timeout: Duration::from_millis(100),
            debounce: Duration::from_millis(50),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    fn responder() -> PriceResponder {
        let cache = RateCache::new(
            Arc::new(FixedRateSource::new(50_000.0)),
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        );
        PriceResponder::new(cache)
    }

    /// Background side that answers the first `failures` requests with an
    /// error and every later one with a 50,000 USD rate
    fn flaky_background(endpoint: Endpoint, failures: usize) -> tokio::task::JoinHandle<()> {
        let Endpoint { sender, mut receiver } = endpoint;
        tokio::spawn(async move {
            let mut seen = 0;
            while let Some(message) = receiver.recv().await {
                let request_id = message
                    .get("requestId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                seen += 1;
                let response = if seen <= failures {
                    PriceResponse::error(request_id, codes::FETCH_FAILED, "source down")
                } else {
                    PriceResponse::success(request_id, RateSnapshot::new(50_000.0, Utc::now(), "test").unwrap())
                };
                let _ = sender.send(serde_json::to_value(&response).unwrap());
            }
        })
    }

    #[tokio::test]
    async fn test_load_annotates_and_watches() {
        let (page, background) = bus::channel();
        let _serving = responder().serve(background);
        let client = Arc::new(PriceClient::connect(page));

        let (document, body, node) = page_with("Only $25 today");
        let session = PageSession::load(client, document.clone(), &page_config(), DisplayConfig::default()).await;

        assert!(session.load_error().is_none());
        assert_eq!(session.snapshot().unwrap().usd_rate(), 50_000.0);
        assert_eq!(session.initial_stats().annotations, 1);
        assert_eq!(
            document.lock().unwrap().text(node).unwrap(),
            "Only $25 (50,000 sats) today"
        );

        let later = {
            let mut doc = document.lock().unwrap();
            let later = doc.create_text("Add-on: $60000");
            doc.append_child(body, later).unwrap();
            later
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(document.lock().unwrap().text(later).unwrap(), "Add-on: $60000 (1.2 BTC)");
        assert_eq!(session.watcher_stats().annotations, 1);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_gives_up_and_leaves_page_untouched() {
        let (page, background) = bus::channel();
        // background endpoint is held but nothing answers
        let _background = background;
        let client = Arc::new(PriceClient::connect(page));

        let (document, _, node) = page_with("$25");
        let session = PageSession::load(client.clone(), document.clone(), &page_config(), DisplayConfig::default()).await;

        assert!(matches!(session.load_error(), Some(ProtocolError::Timeout { .. })));
        assert!(session.snapshot().is_none());
        assert_eq!(document.lock().unwrap().text(node).unwrap(), "$25");
        assert_eq!(client.pending_requests(), 0);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_without_background_reports_no_receiver() {
        let (page, background) = bus::channel();
        drop(background);
        let client = Arc::new(PriceClient::connect(page));

        let (document, _, _) = page_with("$25");
        let session = PageSession::load(client, document, &page_config(), DisplayConfig::default()).await;
        assert!(matches!(session.load_error(), Some(ProtocolError::NoReceiver)));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_recovers_on_next_mutation() {
        let (page, background) = bus::channel();
        let _background = flaky_background(background, 1);
        let client = Arc::new(PriceClient::connect(page));
        let config = PageConfig {
            retry_attempts: 1,
            ..page_config()
        };

        let (document, body, node) = page_with("Only $25 today");
        let session = PageSession::load(client, document.clone(), &config, DisplayConfig::default()).await;
        assert!(matches!(session.load_error(), Some(ProtocolError::Remote { .. })));
        assert_eq!(document.lock().unwrap().text(node).unwrap(), "Only $25 today");

        let later = {
            let mut doc = document.lock().unwrap();
            let later = doc.create_text("Add-on: $50");
            doc.append_child(body, later).unwrap();
            later
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(session.snapshot().unwrap().usd_rate(), 50_000.0);
        assert_eq!(
            document.lock().unwrap().text(node).unwrap(),
            "Only $25 (50,000 sats) today"
        );
        assert_eq!(document.lock().unwrap().text(later).unwrap(), "Add-on: $50 (100,000 sats)");
        assert_eq!(session.watcher_stats().annotations, 2);
        session.close().await;
    }
}
