/*!
 * # Message Queue Implementation
 *
 * Queue plumbing for asynchronous notification delivery. Lifecycle
 * operations enqueue; a worker drains and retries independently of the
 * request that triggered the message.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: String, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another delivery attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Message queue trait for different implementations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn len(&self, topic: &str) -> Result<usize, MessageQueueError>;
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<std::collections::HashMap<String, VecDeque<Message>>>>,
    max_size: usize,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(std::collections::HashMap::new())),
            max_size: 1000,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(std::collections::HashMap::new())),
            max_size,
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues
            .entry(message.topic.clone())
            .or_insert_with(VecDeque::new);

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(topic) {
            Ok(queue.pop_front())
        } else {
            Ok(None)
        }
    }

    async fn len(&self, topic: &str) -> Result<usize, MessageQueueError> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(topic).map(|q| q.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_queue() {
        let queue = InMemoryMessageQueue::new();
        let message = Message::new(
            "test_topic".to_string(),
            serde_json::json!({"test": "data"}),
        );

        // Publish message
        assert!(queue.publish(message.clone()).await.is_ok());
        assert_eq!(queue.len("test_topic").await.unwrap(), 1);

        // Subscribe and receive message
        let received = queue.subscribe("test_topic").await.unwrap();
        assert!(received.is_some());
        assert_eq!(received.unwrap().topic, "test_topic");

        // Queue should be empty now
        let empty = queue.subscribe("test_topic").await.unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_queue_capacity_limit() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        let first = Message::new("cap".to_string(), serde_json::json!({}));
        let second = Message::new("cap".to_string(), serde_json::json!({}));

        assert!(queue.publish(first).await.is_ok());
        assert!(matches!(
            queue.publish(second).await,
            Err(MessageQueueError::QueueFull)
        ));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut message = Message::new("t".to_string(), serde_json::json!({}));
        assert!(message.can_retry());
        message.retry_count = 3;
        assert!(!message.can_retry());
    }
}
