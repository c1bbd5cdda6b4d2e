use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusReceiver, BusSender, Endpoint};
use crate::models::{MessageType, PriceRequest, PriceResponse, RateSnapshot, ResponseStatus};
use crate::services::cache_service::RateCache;
use crate::utils::errors::{codes, ProtocolError};

type Settlement = Result<PriceResponse, ProtocolError>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Settlement>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Page-side half of the price protocol.
///
/// Every request gets a single-use slot keyed by its `requestId`. Whichever
/// of the response dispatcher and the timeout removes the slot first settles
/// the request; the other finds nothing left to settle.
pub struct PriceClient {
    sender: BusSender,
    pending: PendingMap,
    discarded: Arc<AtomicU64>,
    dispatcher: JoinHandle<()>,
}

impl PriceClient {
    /// Attach to the page side of a bus and start routing responses
    pub fn connect(endpoint: Endpoint) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let discarded = Arc::new(AtomicU64::new(0));
        let dispatcher = tokio::spawn(dispatch_responses(
            endpoint.receiver,
            Arc::clone(&pending),
            Arc::clone(&discarded),
        ));

        Self {
            sender: endpoint.sender,
            pending,
            discarded,
            dispatcher,
        }
    }

    /// Ask the background process for the current snapshot
    pub async fn request_price_data(&self, timeout: Duration) -> Result<RateSnapshot, ProtocolError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);

        let message = match serde_json::to_value(PriceRequest::new(request_id.clone())) {
            Ok(message) => message,
            Err(e) => {
                lock(&self.pending).remove(&request_id);
                return Err(ProtocolError::InvalidMessage(e.to_string()));
            }
        };

        if self.sender.send(message).is_err() {
            lock(&self.pending).remove(&request_id);
            debug!("Price request {} had no receiver", request_id);
            return Err(ProtocolError::NoReceiver);
        }

        let settlement = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => return Err(ProtocolError::NoReceiver),
            Err(_) => {
                let abandoned = lock(&self.pending).remove(&request_id).is_some();
                if abandoned {
                    debug!("Price request {} timed out after {}ms", request_id, timeout.as_millis());
                    return Err(ProtocolError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // Settled by the dispatcher right at the deadline
                match rx.try_recv() {
                    Ok(settlement) => settlement,
                    Err(_) => {
                        return Err(ProtocolError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    }
                }
            }
        };

        interpret_response(settlement?)
    }

    /// Requests still awaiting a response
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Responses dropped because nobody was waiting for them
    pub fn discarded_responses(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl Drop for PriceClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

fn interpret_response(response: PriceResponse) -> Result<RateSnapshot, ProtocolError> {
    match (response.status, response.data, response.error) {
        (ResponseStatus::Success, Some(data), _) => Ok(data),
        (ResponseStatus::Success, None, _) => Err(ProtocolError::InvalidResponse(
            "success response without data".to_string(),
        )),
        (ResponseStatus::Error, _, Some(error)) => Err(ProtocolError::Remote {
            code: error.code,
            message: error.message,
        }),
        (ResponseStatus::Error, _, None) => Err(ProtocolError::Remote {
            code: codes::INTERNAL_ERROR.to_string(),
            message: "error response without details".to_string(),
        }),
    }
}

/// Route inbound responses to their waiting requests by `requestId`
async fn dispatch_responses(mut receiver: BusReceiver, pending: PendingMap, discarded: Arc<AtomicU64>) {
    while let Some(message) = receiver.recv().await {
        let request_id = match message.get("requestId").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                warn!("Dropping message without requestId");
                discarded.fetch_add(1, Ordering::SeqCst);
                continue;
            }
        };

        let slot = lock(&pending).remove(&request_id);
        let slot = match slot {
            Some(slot) => slot,
            None => {
                debug!("Discarding response for unknown or abandoned request {}", request_id);
                discarded.fetch_add(1, Ordering::SeqCst);
                continue;
            }
        };

        let settlement = serde_json::from_value::<PriceResponse>(message)
            .map_err(|e| ProtocolError::InvalidResponse(e.to_string()))
            .and_then(|response| match response.kind {
                MessageType::PriceResponse => Ok(response),
                MessageType::PriceRequest => Err(ProtocolError::InvalidResponse(
                    "expected PRICE_RESPONSE".to_string(),
                )),
            });

        if slot.send(settlement).is_err() {
            discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    debug!("Price response channel closed, failing pending requests");
    lock(&pending).clear();
}

/// Background-side half of the price protocol
#[derive(Clone)]
pub struct PriceResponder {
    cache: RateCache,
}

impl PriceResponder {
    pub fn new(cache: RateCache) -> Self {
        Self { cache }
    }

    /// Answer every request arriving on `endpoint`, each in its own task
    pub fn serve(self, endpoint: Endpoint) -> JoinHandle<()> {
        let Endpoint { sender, mut receiver } = endpoint;
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let responder = self.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let response = responder.handle_message(message).await;
                    let request_id = response.request_id.clone();
                    match serde_json::to_value(&response) {
                        Ok(value) => {
                            if sender.send(value).is_err() {
                                debug!("Page went away before response to {}", request_id);
                            }
                        }
                        Err(e) => warn!("Failed to serialize response to {}: {}", request_id, e),
                    }
                });
            }
            debug!("Price request channel closed, responder stopping");
        })
    }

    /// Produce the response for one inbound message
    pub async fn handle_message(&self, message: Value) -> PriceResponse {
        let request_id = message
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let request = match serde_json::from_value::<PriceRequest>(message) {
            Ok(request) if request.kind == MessageType::PriceRequest && !request.request_id.is_empty() => request,
            _ => {
                warn!("Rejecting unknown or invalid message (requestId: '{}')", request_id);
                return PriceResponse::error(request_id, codes::INVALID_MESSAGE, "Unknown or invalid message");
            }
        };

        match self.cache.get_snapshot().await {
            Ok(snapshot) => PriceResponse::success(request.request_id, snapshot),
            Err(e) => {
                warn!("Price request {} failed: {}", request.request_id, e);
                PriceResponse::error(request.request_id, e.code(), e.to_string())
            }
        }
    }
}
