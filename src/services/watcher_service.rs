//! Debounced re-annotation of content added to the page after load

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::dom::observer::{MutationRecord, ObserverId};
use crate::dom::{Document, NodeId};
use crate::models::RateSnapshot;
use crate::services::annotate_service::{AnnotationStats, Annotator};
use crate::services::messaging_service::PriceClient;

/// Debounce state: nothing waiting, or a batch waiting for the quiet period
#[derive(Debug, Default)]
enum DebounceWindow {
    #[default]
    Idle,
    Pending { deadline: Instant, batch: Vec<NodeId> },
}

impl DebounceWindow {
    /// Add nodes to the window and push its deadline out
    fn observe(&mut self, added: Vec<NodeId>, deadline: Instant) {
        match self {
            DebounceWindow::Idle => {
                *self = DebounceWindow::Pending { deadline, batch: added };
            }
            DebounceWindow::Pending {
                deadline: current,
                batch,
            } => {
                *current = deadline;
                batch.extend(added);
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            DebounceWindow::Idle => None,
            DebounceWindow::Pending { deadline, .. } => Some(*deadline),
        }
    }

    /// Close the window, handing back whatever it collected
    fn take(&mut self) -> Vec<NodeId> {
        match std::mem::take(self) {
            DebounceWindow::Idle => Vec::new(),
            DebounceWindow::Pending { batch, .. } => batch,
        }
    }
}

struct Running {
    observer: ObserverId,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

type SharedSnapshot = Arc<watch::Sender<Option<RateSnapshot>>>;

/// Where a watcher without a snapshot asks for one
#[derive(Clone)]
struct PriceSource {
    client: Arc<PriceClient>,
    timeout: Duration,
}

/// Watches a document for added nodes and annotates them once the page
/// has been quiet for the debounce window.
///
/// A watcher started without a snapshot asks its price client for one when
/// a batch fires. Once that succeeds it annotates the whole document, so
/// content that was on the page before the rate arrived is covered too.
pub struct MutationWatcher {
    document: Arc<Mutex<Document>>,
    annotator: Annotator,
    debounce: Duration,
    snapshot: SharedSnapshot,
    source: Option<PriceSource>,
    running: Option<Running>,
    passes: Arc<Mutex<AnnotationStats>>,
}

impl MutationWatcher {
    pub fn new(document: Arc<Mutex<Document>>, annotator: Annotator, debounce: Duration) -> Self {
        Self {
            document,
            annotator,
            debounce,
            snapshot: Arc::new(watch::channel(None).0),
            source: None,
            running: None,
            passes: Arc::new(Mutex::new(AnnotationStats::default())),
        }
    }

    /// Request a snapshot through `client` whenever a batch fires and none
    /// is held yet
    pub fn with_price_client(mut self, client: Arc<PriceClient>, timeout: Duration) -> Self {
        self.source = Some(PriceSource { client, timeout });
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Totals over every pass this watcher has run
    pub fn stats(&self) -> AnnotationStats {
        *self.passes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The snapshot the next pass will use, if any
    pub fn snapshot(&self) -> Option<RateSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Start observing; a second call while running only swaps the snapshot
    pub fn start(&mut self, snapshot: RateSnapshot) {
        self.update_snapshot(snapshot);
        self.spawn();
    }

    /// Start observing with no rate yet. Batches are dropped until the price
    /// client (see [`MutationWatcher::with_price_client`]) delivers one.
    pub fn start_without_snapshot(&mut self) {
        self.spawn();
    }

    fn spawn(&mut self) {
        if self.running.is_some() {
            return;
        }

        let (observer, records) = self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = WatchTask {
            document: self.document.clone(),
            annotator: self.annotator.clone(),
            debounce: self.debounce,
            snapshot: self.snapshot.clone(),
            source: self.source.clone(),
            passes: self.passes.clone(),
        };
        let handle = tokio::spawn(task.run(records, shutdown_rx));

        info!(
            "👀 Mutation watcher started (debounce: {}ms, rate held: {})",
            self.debounce.as_millis(),
            self.snapshot.borrow().is_some()
        );
        self.running = Some(Running {
            observer,
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Use `snapshot` for every pass from now on
    pub fn update_snapshot(&self, snapshot: RateSnapshot) {
        self.snapshot.send_replace(Some(snapshot));
    }

    /// Disconnect the observer and drop any pending window.
    ///
    /// Once this returns no further pass runs.
    pub async fn stop(&mut self) {
        let running = match self.running.take() {
            Some(running) => running,
            None => return,
        };

        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .disconnect(running.observer);
        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            warn!("Mutation watcher task ended abnormally: {}", e);
        }
        info!("Mutation watcher stopped");
    }
}

impl Drop for MutationWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}

struct WatchTask {
    document: Arc<Mutex<Document>>,
    annotator: Annotator,
    debounce: Duration,
    snapshot: SharedSnapshot,
    source: Option<PriceSource>,
    passes: Arc<Mutex<AnnotationStats>>,
}

impl WatchTask {
    async fn run(self, mut records: mpsc::UnboundedReceiver<MutationRecord>, mut shutdown: oneshot::Receiver<()>) {
        let mut window = DebounceWindow::Idle;

        loop {
            let deadline = window.deadline();
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                record = records.recv() => match record {
                    Some(record) => window.observe(record.added, Instant::now() + self.debounce),
                    None => break,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let batch = window.take();
                    self.annotate_batch(batch).await;
                }
            }
        }
        debug!("Mutation watcher loop exited");
    }

    async fn request_snapshot(&self) -> Option<RateSnapshot> {
        let source = self.source.as_ref()?;
        match source.client.request_price_data(source.timeout).await {
            Ok(snapshot) => {
                info!("Rate arrived late ({}), annotating the whole page", snapshot.source());
                Some(snapshot)
            }
            Err(e) => {
                warn!("Price request from watcher failed: {}", e);
                None
            }
        }
    }

    async fn annotate_batch(&self, batch: Vec<NodeId>) {
        let held = self.snapshot.borrow().clone();
        let (snapshot, whole_page) = match held {
            Some(snapshot) => (snapshot, false),
            None => match self.request_snapshot().await {
                Some(snapshot) => {
                    self.snapshot.send_replace(Some(snapshot.clone()));
                    (snapshot, true)
                }
                None => {
                    debug!("No rate yet, dropping batch of {} nodes", batch.len());
                    return;
                }
            },
        };
        let mut document = self.document.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let roots = if whole_page {
            vec![document.root()]
        } else {
            top_level_nodes(&document, batch)
        };
        let mut stats = AnnotationStats::default();
        for root in &roots {
            stats.merge(self.annotator.annotate_subtree(&mut document, *root, &snapshot));
        }
        let swept = self.annotator.processed().sweep(&document);
        drop(document);

        debug!(
            "Watcher pass over {} subtrees: {} annotations, {} boundary errors, {} stale ids swept",
            roots.len(),
            stats.annotations,
            stats.boundary_errors,
            swept
        );
        self.passes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(stats);
    }
}

/// Connected nodes of `batch` that have no ancestor in the batch, in arrival
/// order and without duplicates
fn top_level_nodes(document: &Document, batch: Vec<NodeId>) -> Vec<NodeId> {
    let members: HashSet<NodeId> = batch.iter().copied().collect();
    let mut seen = HashSet::new();
    batch
        .into_iter()
        .filter(|&id| document.is_connected(id))
        .filter(|&id| {
            let mut current = document.parent(id);
            while let Some(ancestor) = current {
                if members.contains(&ancestor) {
                    return false;
                }
                current = document.parent(ancestor);
            }
            true
        })
        .filter(|&id| seen.insert(id))
        .collect()
}
