//! Live status feed.
//!
//! Per-order publish/subscribe over tokio broadcast channels. The engine
//! publishes after every committed transition; subscribers get the current
//! state as an initial snapshot followed by the live feed. Late subscribers
//! start from the current state (no replay); slow subscribers that lag past
//! the channel capacity drop to the latest updates. Unsubscription is
//! dropping the receiver.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{EventType, ExecutionStatus};

/// Default broadcast capacity per order.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One published transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub order_id: Uuid,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// The event that accompanied the transition, if any.
    pub event_type: Option<EventType>,
    pub step_name: Option<String>,
    pub at: DateTime<Utc>,
}

/// A live subscription: the current state plus the feed of further updates.
pub struct Subscription {
    /// State at subscription time; `None` when the order has no published
    /// state yet.
    pub snapshot: Option<StatusUpdate>,
    /// Feed of subsequent updates.
    pub receiver: broadcast::Receiver<StatusUpdate>,
}

impl Subscription {
    /// Flatten into one stream: the snapshot (if any) followed by live
    /// updates. Lag gaps are swallowed; the subscriber simply continues
    /// from the newest buffered update.
    pub fn into_stream(self) -> impl tokio_stream::Stream<Item = StatusUpdate> {
        use tokio_stream::StreamExt;

        let snapshot = tokio_stream::iter(self.snapshot);
        let live = tokio_stream::wrappers::BroadcastStream::new(self.receiver)
            .filter_map(|item| item.ok());
        snapshot.chain(live)
    }
}

struct OrderChannel {
    sender: broadcast::Sender<StatusUpdate>,
    latest: Option<StatusUpdate>,
}

/// Per-order status fan-out.
pub struct StatusStreamHub {
    capacity: usize,
    channels: RwLock<HashMap<Uuid, OrderChannel>>,
}

impl StatusStreamHub {
    /// Create a hub with the default per-order capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub with an explicit per-order capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a committed transition to an order's subscribers.
    ///
    /// Lagging or absent subscribers never block the publisher.
    pub async fn publish(&self, update: StatusUpdate) {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(update.order_id)
            .or_insert_with(|| OrderChannel {
                sender: broadcast::channel(self.capacity).0,
                latest: None,
            });

        channel.latest = Some(update.clone());
        // Send fails only when there are no receivers; the snapshot still
        // serves late subscribers.
        let delivered = channel.sender.send(update.clone()).unwrap_or(0);
        debug!(
            order_id = %update.order_id,
            status = %update.status,
            subscribers = delivered,
            "Published status update"
        );
    }

    /// Subscribe to an order's transitions.
    pub async fn subscribe(&self, order_id: Uuid) -> Subscription {
        let mut channels = self.channels.write().await;
        let channel = channels.entry(order_id).or_insert_with(|| OrderChannel {
            sender: broadcast::channel(self.capacity).0,
            latest: None,
        });

        Subscription {
            snapshot: channel.latest.clone(),
            receiver: channel.sender.subscribe(),
        }
    }

    /// Drop the channel of a settled order once subscribers are gone.
    ///
    /// Safe to call at any time; an active subscriber keeps receiving from
    /// its own receiver handle.
    pub async fn forget(&self, order_id: Uuid) {
        self.channels.write().await.remove(&order_id);
    }
}

impl Default for StatusStreamHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience constructor used by the engine.
pub fn shared_hub() -> Arc<StatusStreamHub> {
    Arc::new(StatusStreamHub::new())
}
