use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::broker::QoS;

/// A single message travelling through a client's publish pipeline.
///
/// Created by the generator, stamped by the publisher as it renders and sends
/// the payload, and completed by the ack waiter before it reaches the collector.
#[derive(Debug)]
pub struct Message {
    /// Sequence number within the client, starting at `0`.
    pub index: u64,
    pub topic: Arc<str>,
    pub qos: QoS,
    sent_at: Option<Instant>,
    status: DeliveryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryStatus {
    Pending,
    Delivered(Instant),
    Failed,
}

impl Message {
    pub fn new(index: u64, topic: Arc<str>, qos: QoS) -> Self {
        Self {
            index,
            topic,
            qos,
            sent_at: None,
            status: DeliveryStatus::Pending,
        }
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.sent_at = Some(at);
    }

    pub fn mark_delivered(&mut self, at: Instant) {
        self.status = DeliveryStatus::Delivered(at);
    }

    pub fn mark_failed(&mut self) {
        self.status = DeliveryStatus::Failed;
    }

    /// Time between send and delivery acknowledgement, for delivered messages only.
    ///
    /// A message that was never sent cannot have been delivered.
    pub fn latency(&self) -> Option<Duration> {
        match (self.sent_at, self.status) {
            (Some(sent), DeliveryStatus::Delivered(delivered)) => {
                Some(delivered.saturating_duration_since(sent))
            }
            _ => None,
        }
    }
}
