use tokio::sync::mpsc;

use super::NodeId;

/// Nodes added under `target` by one structural change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(super) struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(ObserverId, mpsc::UnboundedSender<MutationRecord>)>,
}

impl ObserverRegistry {
    pub(super) fn register(&mut self) -> (ObserverId, mpsc::UnboundedReceiver<MutationRecord>) {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push((id, tx));
        (id, rx)
    }

    pub(super) fn unregister(&mut self, id: ObserverId) {
        self.observers.retain(|(observer, _)| *observer != id);
    }

    /// Deliver to every live observer, forgetting those whose receiver is gone
    pub(super) fn notify(&mut self, record: MutationRecord) {
        self.observers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
    }
}
