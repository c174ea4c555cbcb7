//! Audit and notification reactions to order mutations.
//!
//! The lifecycle service calls this explicitly after every field-mutating
//! operation: history rows go into the same transaction as the mutation,
//! notifications are queued once the transaction has committed. There is no
//! hidden ORM hook; the engine owns the control flow.

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::entities::{order, order_history};
use crate::errors::ServiceError;
use crate::models::OrderStatus;
use crate::notifications::NotificationDispatcher;

/// Fields whose changes are persisted to the audit trail.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum TrackedField {
    #[strum(serialize = "status")]
    Status,
    #[strum(serialize = "priority")]
    Priority,
    #[strum(serialize = "assigned_to")]
    AssignedTo,
    #[strum(serialize = "estimated_completion")]
    EstimatedCompletion,
    #[strum(serialize = "title")]
    Title,
    #[strum(serialize = "description")]
    Description,
    #[strum(serialize = "notes")]
    Notes,
    #[strum(serialize = "category_id")]
    CategoryId,
}

/// One observed tracked-field change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: TrackedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl FieldChange {
    pub fn is_status(&self) -> bool {
        self.field == TrackedField::Status
    }
}

fn stringify<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

/// Computes the tracked-field delta between two snapshots of an order.
/// Untracked fields (totals, version, timestamps) never appear here.
pub fn diff(before: &order::Model, after: &order::Model) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if before.status != after.status {
        changes.push(FieldChange {
            field: TrackedField::Status,
            old_value: Some(before.status.to_string()),
            new_value: Some(after.status.to_string()),
        });
    }
    if before.priority != after.priority {
        changes.push(FieldChange {
            field: TrackedField::Priority,
            old_value: Some(before.priority.to_string()),
            new_value: Some(after.priority.to_string()),
        });
    }
    if before.assigned_to != after.assigned_to {
        changes.push(FieldChange {
            field: TrackedField::AssignedTo,
            old_value: stringify(&before.assigned_to),
            new_value: stringify(&after.assigned_to),
        });
    }
    if before.estimated_completion != after.estimated_completion {
        changes.push(FieldChange {
            field: TrackedField::EstimatedCompletion,
            old_value: before.estimated_completion.map(|d| d.to_rfc3339()),
            new_value: after.estimated_completion.map(|d| d.to_rfc3339()),
        });
    }
    if before.title != after.title {
        changes.push(FieldChange {
            field: TrackedField::Title,
            old_value: Some(before.title.clone()),
            new_value: Some(after.title.clone()),
        });
    }
    if before.description != after.description {
        changes.push(FieldChange {
            field: TrackedField::Description,
            old_value: before.description.clone(),
            new_value: after.description.clone(),
        });
    }
    if before.notes != after.notes {
        changes.push(FieldChange {
            field: TrackedField::Notes,
            old_value: before.notes.clone(),
            new_value: after.notes.clone(),
        });
    }
    if before.category_id != after.category_id {
        changes.push(FieldChange {
            field: TrackedField::CategoryId,
            old_value: stringify(&before.category_id),
            new_value: stringify(&after.category_id),
        });
    }

    changes
}

/// Reacts to order mutations: appends audit rows, queues notifications.
pub struct OrderObserver {
    dispatcher: Arc<NotificationDispatcher>,
}

impl OrderObserver {
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Persists one history row per change, inside the caller's transaction
    /// so the audit trail commits or rolls back with the mutation itself.
    pub async fn record_changes<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        changes: &[FieldChange],
        actor: Uuid,
    ) -> Result<(), ServiceError> {
        for change in changes {
            order_history::ActiveModel {
                order_id: Set(order_id),
                field: Set(change.field.to_string()),
                old_value: Set(change.old_value.clone()),
                new_value: Set(change.new_value.clone()),
                changed_by: Set(actor),
                created_at: Set(chrono::Utc::now()),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }

        if !changes.is_empty() {
            debug!(order_id = %order_id, count = changes.len(), "order history recorded");
        }

        Ok(())
    }

    /// Queues notifications for a committed mutation. A status change routes
    /// through the status mapping; anything else gets an audit copy only.
    pub async fn notify(
        &self,
        old_status: OrderStatus,
        order: &order::Model,
        changes: &[FieldChange],
    ) {
        if changes.iter().any(FieldChange::is_status) {
            self.dispatcher
                .status_changed(order, old_status, order.status)
                .await;
        } else if !changes.is_empty() {
            let fields: Vec<String> = changes.iter().map(|c| c.field.to_string()).collect();
            self.dispatcher.details_changed(order, &fields).await;
        }
    }

    /// Creation is not a transition; it notifies the creator and the
    /// administrators directly.
    pub async fn order_created(&self, order: &order::Model) {
        self.dispatcher.order_created(order).await;
    }
}
