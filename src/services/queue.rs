// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Topic-based publish/subscribe over bounded broadcast channels.
//!
//! There is no ordering guarantee across publishers and no deduplication.
//! Slow subscribers skip messages they lagged behind on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Default per-topic buffer.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// A published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Receiving end for one topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message. Fails once the queue is closed.
    pub async fn recv(&mut self) -> Result<Envelope, ServiceError> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Ok(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ServiceError::QueueClosed),
            }
        }
    }

    /// Next message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// In-process message queue.
pub struct MessageQueue {
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, ServiceError> {
        if self.is_closed() {
            return Err(ServiceError::QueueClosed);
        }
        let mut topics = self.topics.write().await;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(Subscription {
            topic: topic.to_string(),
            rx: sender.subscribe(),
        })
    }

    /// Publish and report how many subscribers received the message.
    /// Fails with [`ServiceError::NoSubscribers`] when nobody listens.
    pub async fn try_publish(
        &self,
        topic: &str,
        payload: Value,
    ) -> Result<(String, usize), ServiceError> {
        if self.is_closed() {
            return Err(ServiceError::QueueClosed);
        }

        let envelope = Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };
        let id = envelope.id.clone();

        let topics = self.topics.read().await;
        let sender = topics
            .get(topic)
            .ok_or_else(|| ServiceError::NoSubscribers(topic.to_string()))?;
        let delivered = sender
            .send(envelope)
            .map_err(|_| ServiceError::NoSubscribers(topic.to_string()))?;
        Ok((id, delivered))
    }

    /// Publish a message, returning its id. Messages to topics without
    /// subscribers are dropped.
    pub async fn publish_message(&self, topic: &str, payload: Value) -> Result<String, ServiceError> {
        match self.try_publish(topic, payload).await {
            Ok((id, delivered)) => {
                debug!(topic, message_id = %id, delivered, "Published message");
                Ok(id)
            }
            Err(ServiceError::NoSubscribers(_)) => {
                let id = uuid::Uuid::new_v4().to_string();
                debug!(topic, message_id = %id, "Dropped message without subscribers");
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the queue. Pending subscribers see [`ServiceError::QueueClosed`]
    /// after draining buffered messages.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_fans_out() {
        let queue = MessageQueue::default();
        let mut a = queue.subscribe("events").await.unwrap();
        let mut b = queue.subscribe("events").await.unwrap();

        let (id, delivered) = queue
            .try_publish("events", json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.recv().await.unwrap().id, id);
        let got = b.recv().await.unwrap();
        assert_eq!(got.payload, json!({"n": 1}));
        assert_eq!(got.topic, "events");
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let queue = MessageQueue::default();
        assert!(matches!(
            queue.try_publish("void", json!(null)).await,
            Err(ServiceError::NoSubscribers(_))
        ));
        assert!(queue.publish_message("void", json!(null)).await.is_ok());
    }

    #[tokio::test]
    async fn test_close() {
        let queue = MessageQueue::new(4);
        let mut sub = queue.subscribe("t").await.unwrap();
        queue.publish_message("t", json!(1)).await.unwrap();
        queue.close().await;

        assert_eq!(sub.recv().await.unwrap().payload, json!(1));
        assert!(matches!(sub.recv().await, Err(ServiceError::QueueClosed)));
        assert!(matches!(
            queue.publish_message("t", json!(2)).await,
            Err(ServiceError::QueueClosed)
        ));
        assert!(queue.subscribe("t").await.is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let queue = MessageQueue::new(2);
        let mut sub = queue.subscribe("t").await.unwrap();
        for n in 0..5 {
            queue.publish_message("t", json!(n)).await.unwrap();
        }
        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload, json!(3));
    }
}
