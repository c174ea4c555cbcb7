//! Notification routing and queued delivery.
//!
//! The lifecycle engine decides *which* event fired and *who* hears about
//! it; delivery itself is queued and retried by a worker so that a mail
//! outage never fails the operation that triggered the message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order;
use crate::message_queue::{Message, MessageQueue};
use crate::models::{OrderStage, OrderStatus};

/// Customer- and creator-facing messages (mail channel).
pub const MAIL_TOPIC: &str = "notifications.mail";
/// Shop-administrator audit copies.
pub const AUDIT_TOPIC: &str = "notifications.audit";

/// Who a queued notification addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Customer,
    Creator,
    Administrators,
}

/// Mail template for the customer when an order reaches `status`.
/// Statuses without an entry notify administrators only.
pub fn customer_template(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::AwaitingReview => Some("order_received"),
        // The auto-chained approval hop reuses the budget template.
        OrderStatus::Reviewed | OrderStatus::AwaitingCustomerApproval => {
            Some("budget_ready_for_approval")
        }
        OrderStatus::ReadyForWork => Some("work_approved"),
        OrderStatus::ReadyForDelivery => Some("ready_for_delivery"),
        OrderStatus::Delivered => Some("order_delivered"),
        OrderStatus::Paid => Some("payment_received"),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery timed out")]
    Timeout,
    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport abstraction. The real mail transport lives outside this crate;
/// [`LoggingMailChannel`] stands in wherever no transport is wired up.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), NotificationError>;
}

/// Channel that only logs. Useful as a default and in development.
pub struct LoggingMailChannel;

#[async_trait]
impl NotificationChannel for LoggingMailChannel {
    async fn deliver(&self, message: &Message) -> Result<(), NotificationError> {
        info!(
            topic = %message.topic,
            payload = %message.payload,
            "notification delivered (logging channel)"
        );
        Ok(())
    }
}

/// Builds and enqueues notification messages. Queue failures are logged,
/// never surfaced: lifecycle success is independent of delivery.
pub struct NotificationDispatcher {
    queue: Arc<dyn MessageQueue>,
    max_retries: u32,
}

impl NotificationDispatcher {
    pub fn new(queue: Arc<dyn MessageQueue>, max_retries: u32) -> Self {
        Self { queue, max_retries }
    }

    /// Order creation: tell the creator, copy the administrators.
    pub async fn order_created(&self, order: &order::Model) {
        self.enqueue(
            MAIL_TOPIC,
            self.payload("order_created", order, Recipient::Creator, Some(order.created_by)),
        )
        .await;
        self.enqueue(
            AUDIT_TOPIC,
            self.payload("order_created", order, Recipient::Administrators, None),
        )
        .await;
    }

    /// Status transition: customer template when one is mapped, audit copy
    /// always.
    pub async fn status_changed(
        &self,
        order: &order::Model,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) {
        if let Some(template) = customer_template(new_status) {
            self.enqueue(
                MAIL_TOPIC,
                self.payload(template, order, Recipient::Customer, Some(order.customer_id)),
            )
            .await;
        }
        let mut audit = self.payload(
            "order_status_changed",
            order,
            Recipient::Administrators,
            None,
        );
        audit["old_status"] = json!(old_status.to_string());
        audit["new_status"] = json!(new_status.to_string());
        self.enqueue(AUDIT_TOPIC, audit).await;
    }

    /// Non-status tracked-field changes get an audit copy only.
    pub async fn details_changed(&self, order: &order::Model, fields: &[String]) {
        let mut audit = self.payload(
            "order_details_changed",
            order,
            Recipient::Administrators,
            None,
        );
        audit["fields"] = json!(fields);
        self.enqueue(AUDIT_TOPIC, audit).await;
    }

    fn payload(
        &self,
        event: &str,
        order: &order::Model,
        recipient: Recipient,
        user_id: Option<Uuid>,
    ) -> serde_json::Value {
        json!({
            "event": event,
            "order_id": order.id,
            "order_number": order.order_number,
            "status": order.status.to_string(),
            "status_label": order.status.label(),
            "stage": OrderStage::from(order.status).label(),
            "recipient": { "kind": recipient, "user_id": user_id },
        })
    }

    async fn enqueue(&self, topic: &str, payload: serde_json::Value) {
        let message = Message::new(topic.to_string(), payload).with_max_retries(self.max_retries);
        if let Err(e) = self.queue.publish(message).await {
            error!(topic = topic, error = %e, "failed to enqueue notification");
        }
    }
}

/// Bounds on delivery attempts.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub attempt_timeout: Duration,
    pub idle_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(120),
            idle_backoff: Duration::from_millis(500),
        }
    }
}

/// Drains the notification queue and pushes messages through the channel,
/// retrying per message up to its retry budget.
pub struct NotificationWorker {
    queue: Arc<dyn MessageQueue>,
    channel: Arc<dyn NotificationChannel>,
    settings: WorkerSettings,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        channel: Arc<dyn NotificationChannel>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            channel,
            settings,
        }
    }

    /// Long-running drain loop; spawn onto the runtime.
    pub async fn run(&self) {
        info!("Starting notification worker");
        loop {
            if self.drain_once().await == 0 {
                tokio::time::sleep(self.settings.idle_backoff).await;
            }
        }
    }

    /// Processes everything currently queued on both topics. Returns the
    /// number of messages taken off the queue.
    pub async fn drain_once(&self) -> usize {
        let mut processed = 0;
        for topic in [MAIL_TOPIC, AUDIT_TOPIC] {
            loop {
                match self.queue.subscribe(topic).await {
                    Ok(Some(message)) => {
                        processed += 1;
                        self.deliver_with_retries(message).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(topic = topic, error = %e, "failed to poll notification queue");
                        break;
                    }
                }
            }
        }
        processed
    }

    async fn deliver_with_retries(&self, mut message: Message) {
        loop {
            let attempt = timeout(self.settings.attempt_timeout, self.channel.deliver(&message));
            let outcome = match attempt.await {
                Ok(result) => result,
                Err(_) => Err(NotificationError::Timeout),
            };

            match outcome {
                Ok(()) => return,
                Err(e) => {
                    message.retry_count += 1;
                    if message.can_retry() {
                        warn!(
                            message_id = %message.id,
                            retry = message.retry_count,
                            error = %e,
                            "notification delivery failed, retrying"
                        );
                    } else {
                        // Permanent failure is logged, never escalated.
                        error!(
                            message_id = %message.id,
                            topic = %message.topic,
                            error = %e,
                            "notification delivery failed permanently"
                        );
                        return;
                    }
                }
            }
        }
    }
}
