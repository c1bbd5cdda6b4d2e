//! In-process message bus between the page and the background process.
//!
//! Each side holds an [`Endpoint`]; messages are untyped JSON so either side
//! can receive malformed input. Delivery is best-effort: sending to a side
//! whose receiver is gone fails with [`BusError::NoReceiver`].

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("No receiver connected")]
    NoReceiver,
}

/// Sending half of an endpoint; cheap to clone
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl BusSender {
    pub fn send(&self, message: Value) -> Result<(), BusError> {
        self.tx.send(message).map_err(|_| BusError::NoReceiver)
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Receiving half of an endpoint
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl BusReceiver {
    /// Next message, or None once the other side is gone
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// One side of a bus connection
pub struct Endpoint {
    pub sender: BusSender,
    pub receiver: BusReceiver,
}

/// Create a connected pair: (page side, background side)
pub fn channel() -> (Endpoint, Endpoint) {
    let (page_tx, background_rx) = mpsc::unbounded_channel();
    let (background_tx, page_rx) = mpsc::unbounded_channel();

    let page = Endpoint {
        sender: BusSender { tx: page_tx },
        receiver: BusReceiver { rx: page_rx },
    };
    let background = Endpoint {
        sender: BusSender { tx: background_tx },
        receiver: BusReceiver { rx: background_rx },
    };
    (page, background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_messages_cross_in_both_directions() {
        let (mut page, mut background) = channel();

        page.sender.send(json!({ "ping": 1 })).unwrap();
        assert_eq!(background.receiver.recv().await, Some(json!({ "ping": 1 })));

        background.sender.send(json!({ "pong": 1 })).unwrap();
        assert_eq!(page.receiver.recv().await, Some(json!({ "pong": 1 })));
    }

    #[tokio::test]
    async fn test_send_without_receiver_fails() {
        let (page, background) = channel();
        drop(background);

        assert!(!page.sender.is_connected());
        assert_eq!(page.sender.send(json!({})), Err(BusError::NoReceiver));
    }
}
