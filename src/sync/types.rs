use crate::transport::{ChangeEvent, TransportError};

use std::sync::Arc;
use tokio::sync::watch;

/// Callback invoked for every change event delivered on a subscription.
pub type SyncCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Error types for the realtime sync services
#[derive(Debug, thiserror::Error)]
pub enum SyncServiceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Listener error: {0}")]
    Listener(String),
}

/// Acknowledgment state of a subscription.
///
/// `subscribe` returns before the backend acknowledges the channel; the phase
/// moves from `Pending` to `Subscribed` on acknowledgment, or to `Failed` on
/// a channel error (after which the service re-creates the subscription under
/// a new id). `Closed` is terminal after an explicit unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Pending,
    Subscribed,
    Failed,
    Closed,
}

/// Handle returned by `subscribe`: the subscription id plus a watch on the
/// eventual acknowledgment outcome.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: String,
    phase: watch::Receiver<SubscriptionPhase>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: String, phase: watch::Receiver<SubscriptionPhase>) -> Self {
        Self { id, phase }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current acknowledgment state without waiting.
    pub fn phase(&self) -> SubscriptionPhase {
        *self.phase.borrow()
    }

    /// Wait until the backend acknowledged (or rejected) the subscription.
    pub async fn acknowledged(&mut self) -> SubscriptionPhase {
        loop {
            let current = *self.phase.borrow();
            if current != SubscriptionPhase::Pending {
                return current;
            }
            if self.phase.changed().await.is_err() {
                return *self.phase.borrow();
            }
        }
    }
}
