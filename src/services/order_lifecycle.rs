//! The order lifecycle engine.
//!
//! Every status change in the system funnels through this service: each
//! operation checks the allowed-predecessor rule for its target status,
//! bundles its row mutations into one transaction, finalizes the order row
//! with a version-guarded update, and hands the committed delta to the
//! observer for audit and notification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    motor_info, order, order_history, order_item, order_item_component, order_service,
    service_catalog,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::features::MotorItemsDecision;
use crate::models::{ItemType, OrderPriority, OrderStatus};
use crate::services::order_observer::{diff, FieldChange, OrderObserver, TrackedField};
use crate::services::totals;

/// Statuses an order may hold immediately before moving to `target`.
pub fn allowed_sources(target: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match target {
        // Orders are born in Received; nothing transitions into it.
        Received => &[],
        AwaitingReview => &[Received],
        Reviewed => &[AwaitingReview],
        AwaitingCustomerApproval => &[Reviewed],
        ReadyForWork => &[AwaitingCustomerApproval],
        Open => &[ReadyForWork],
        InProgress => &[ReadyForWork, Open],
        ReadyForDelivery => &[ReadyForWork, Open, InProgress],
        Delivered => &[ReadyForDelivery],
        Paid => &[Delivered, NotPaid],
        NotPaid => &[Delivered],
        Completed => &[Paid],
        Returned => &[Delivered, NotPaid],
        OnHold => &[
            AwaitingReview,
            Reviewed,
            AwaitingCustomerApproval,
            ReadyForWork,
            Open,
            InProgress,
        ],
        Cancelled => &[
            Received,
            AwaitingReview,
            Reviewed,
            AwaitingCustomerApproval,
            ReadyForWork,
            Open,
            InProgress,
            OnHold,
        ],
    }
}

/// Transition the engine performs on its own right after committing a hop
/// into the given status. Applied repeatedly (with a cycle guard) until no
/// entry matches.
pub fn follow_up(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::Reviewed => Some(OrderStatus::AwaitingCustomerApproval),
        _ => None,
    }
}

/// Request/Response types for the lifecycle service
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 120, message = "Title is required"))]
    pub title: String,
    pub description: Option<String>,
    pub priority: OrderPriority,
    pub category_id: Option<Uuid>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[serde(default)]
    pub motor: MotorInput,
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MotorInput {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub down_payment: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemInput {
    pub item_type: ItemType,
    pub notes: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

/// One budgeting line; upserted by (order_item_id, service_key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLine {
    pub order_item_id: Uuid,
    pub service_key: String,
    pub measurement: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OrderDetailsPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub priority: Option<OrderPriority>,
    pub category_id: Option<Uuid>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl OrderDetailsPatch {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.notes.is_none()
            && self.priority.is_none()
            && self.category_id.is_none()
            && self.estimated_completion.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct ItemDetails {
    pub item: order_item::Model,
    pub components: Vec<order_item_component::Model>,
}

/// Order with its satellite rows loaded.
#[derive(Debug, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub motor_info: Option<motor_info::Model>,
    pub items: Vec<ItemDetails>,
    pub services: Vec<order_service::Model>,
}

async fn load_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

fn ensure_status(
    order: &order::Model,
    allowed: &[OrderStatus],
    action: &str,
) -> Result<(), ServiceError> {
    if allowed.contains(&order.status) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ServiceError::InvalidStatus(format!(
        "cannot {} for order {}: requires status in [{}], found {}",
        action, order.id, expected, order.status
    )))
}

/// Service driving all order mutations.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DbPool>,
    observer: Arc<OrderObserver>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderLifecycleService {
    pub fn new(
        db: Arc<DbPool>,
        observer: Arc<OrderObserver>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            observer,
            event_sender,
        }
    }

    /// Creates a new order together with its motor info, items and
    /// components in one atomic unit, then hands it to the review queue.
    ///
    /// The motor-items decision is resolved by the caller (feature rollout,
    /// see `crate::features`); when disabled, the submitted items are
    /// skipped and the order starts with an empty item set.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, title = %request.title))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        creator: Uuid,
        motor_items: MotorItemsDecision,
    ) -> Result<OrderDetails, ServiceError> {
        request.validate().map_err(ServiceError::from)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = format!("WO-{}", &order_id.simple().to_string()[..8].to_uppercase());

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let created = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            title: Set(request.title.clone()),
            description: Set(request.description.clone()),
            status: Set(OrderStatus::Received),
            priority: Set(request.priority),
            category_id: Set(request.category_id),
            customer_id: Set(request.customer_id),
            created_by: Set(creator),
            updated_by: Set(creator),
            assigned_to: Set(None),
            notes: Set(request.notes.clone()),
            estimated_completion: Set(request.estimated_completion),
            actual_completion: Set(None),
            total_cost: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        motor_info::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            brand: Set(request.motor.brand.clone()),
            model: Set(request.motor.model.clone()),
            serial_number: Set(request.motor.serial_number.clone()),
            down_payment: Set(request.motor.down_payment.unwrap_or(Decimal::ZERO)),
            total_cost: Set(Decimal::ZERO),
            is_fully_paid: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        if motor_items.is_enabled() {
            for item in &request.items {
                let item_id = Uuid::new_v4();
                order_item::ActiveModel {
                    id: Set(item_id),
                    order_id: Set(order_id),
                    item_type: Set(item.item_type),
                    is_received: Set(true),
                    notes: Set(item.notes.clone()),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                for name in &item.components {
                    order_item_component::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_item_id: Set(item_id),
                        name: Set(name.clone()),
                        is_received: Set(true),
                        created_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        } else if !request.items.is_empty() {
            info!(
                order_id = %order_id,
                skipped = request.items.len(),
                "motor-items intake disabled; submitted items were not collected"
            );
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, customer_id = %request.customer_id, "Order created");

        self.observer.order_created(&created).await;
        self.emit(Event::OrderCreated(order_id)).await;

        // Intake done; the review hop runs through the normal guarded path
        // so a failure here surfaces instead of orphaning the order.
        let order = self
            .apply_transition(order_id, OrderStatus::AwaitingReview, creator)
            .await?;

        self.load_details(order.id).await
    }

    /// Attaches priced services to the order's items and moves it to
    /// `Reviewed`; the follow-up table then advances it to
    /// `AwaitingCustomerApproval`.
    #[instrument(skip(self, lines), fields(order_id = %order_id, lines = lines.len()))]
    pub async fn submit_budget(
        &self,
        order_id: Uuid,
        lines: Vec<BudgetLine>,
        reviewer: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        ensure_status(
            &before,
            allowed_sources(OrderStatus::Reviewed),
            "submit a budget",
        )?;

        for line in &lines {
            let catalog = service_catalog::Entity::find()
                .filter(service_catalog::Column::ServiceKey.eq(line.service_key.as_str()))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Service '{}' not found in catalog",
                        line.service_key
                    ))
                })?;

            let item = order_item::Entity::find_by_id(line.order_item_id)
                .one(&txn)
                .await?
                .filter(|item| item.order_id == order_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Order item {} not found on order {}",
                        line.order_item_id, order_id
                    ))
                })?;

            // One service row per (item, key): re-budgeting updates in place.
            let existing = order_service::Entity::find()
                .filter(order_service::Column::OrderItemId.eq(item.id))
                .filter(order_service::Column::ServiceKey.eq(line.service_key.as_str()))
                .one(&txn)
                .await?;

            match existing {
                Some(model) => {
                    let mut active: order_service::ActiveModel = model.into();
                    active.measurement = Set(line.measurement.clone());
                    active.is_budgeted = Set(true);
                    active.base_price = Set(catalog.base_price);
                    active.net_price = Set(catalog.net_price);
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&txn).await?;
                }
                None => {
                    order_service::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        order_item_id: Set(item.id),
                        service_key: Set(line.service_key.clone()),
                        measurement: Set(line.measurement.clone()),
                        is_budgeted: Set(true),
                        base_price: Set(catalog.base_price),
                        net_price: Set(catalog.net_price),
                        is_authorized: Set(false),
                        is_completed: Set(false),
                        ..Default::default()
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }

        totals::recalculate(&txn, order_id).await?;

        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::Reviewed),
                OrderStatus::Reviewed,
                reviewer,
                |_| {},
            )
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, lines = lines.len(), "budget submitted");
        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::BudgetSubmitted {
            order_id,
            line_count: lines.len(),
        })
        .await;

        let order = self.run_follow_ups(after, reviewer).await?;
        self.load_details(order.id).await
    }

    /// Marks the customer-authorized services, records the optional down
    /// payment and releases the order for work.
    #[instrument(skip(self, authorized_service_ids), fields(order_id = %order_id))]
    pub async fn customer_approval(
        &self,
        order_id: Uuid,
        authorized_service_ids: Vec<Uuid>,
        down_payment: Option<Decimal>,
        approver: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        if let Some(amount) = down_payment {
            if amount < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Down payment cannot be negative".to_string(),
                ));
            }
        }

        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        ensure_status(
            &before,
            allowed_sources(OrderStatus::ReadyForWork),
            "approve the budget",
        )?;

        let updated = order_service::Entity::update_many()
            .col_expr(order_service::Column::IsAuthorized, Expr::value(true))
            .col_expr(
                order_service::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(order_service::Column::OrderId.eq(order_id))
            .filter(order_service::Column::Id.is_in(authorized_service_ids.clone()))
            .exec(&txn)
            .await?;

        if let Some(amount) = down_payment {
            let motor = motor_info::Entity::find()
                .filter(motor_info::Column::OrderId.eq(order_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Motor info for order {} not found", order_id))
                })?;
            let mut active: motor_info::ActiveModel = motor.into();
            active.down_payment = Set(amount);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }

        totals::recalculate(&txn, order_id).await?;

        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::ReadyForWork),
                OrderStatus::ReadyForWork,
                approver,
                |_| {},
            )
            .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            authorized = updated.rows_affected,
            "customer approval recorded"
        );
        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::ServicesAuthorized {
            order_id,
            count: updated.rows_affected,
        })
        .await;

        let order = self.run_follow_ups(after, approver).await?;
        self.load_details(order.id).await
    }

    /// Flags the named services as done. Status is unaffected; advancing to
    /// delivery is a separate call.
    #[instrument(skip(self, completed_service_ids), fields(order_id = %order_id))]
    pub async fn mark_work_completed(
        &self,
        order_id: Uuid,
        completed_service_ids: Vec<Uuid>,
        technician: Uuid,
    ) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        ensure_status(
            &before,
            &[OrderStatus::ReadyForWork, OrderStatus::InProgress],
            "mark services completed",
        )?;

        let updated = order_service::Entity::update_many()
            .col_expr(order_service::Column::IsCompleted, Expr::value(true))
            .col_expr(
                order_service::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(order_service::Column::OrderId.eq(order_id))
            .filter(order_service::Column::Id.is_in(completed_service_ids))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, completed = updated.rows_affected, "services marked completed");
        self.emit(Event::ServicesCompleted {
            order_id,
            count: updated.rows_affected,
        })
        .await;

        Ok(updated.rows_affected)
    }

    /// Recomputes totals and moves the order to `ReadyForDelivery`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_ready_for_delivery(
        &self,
        order_id: Uuid,
        technician: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;

        totals::recalculate(&txn, order_id).await?;

        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::ReadyForDelivery),
                OrderStatus::ReadyForDelivery,
                technician,
                |_| {},
            )
            .await?;

        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.run_follow_ups(after, technician).await
    }

    /// Hands the finished engine back to the customer.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn deliver_order(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order = self
            .apply_transition(order_id, OrderStatus::Delivered, actor)
            .await?;
        self.emit(Event::OrderDelivered(order_id)).await;
        Ok(order)
    }

    /// ReadyForWork/Open → InProgress.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn start_work(
        &self,
        order_id: Uuid,
        technician: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.apply_transition(order_id, OrderStatus::InProgress, technician)
            .await
    }

    /// Releases an approved order onto the shop floor, assigning it in the
    /// same guarded update.
    #[instrument(skip(self), fields(order_id = %order_id, assignee = %assignee))]
    pub async fn release_to_floor(
        &self,
        order_id: Uuid,
        assignee: Uuid,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::Open),
                OrderStatus::Open,
                actor,
                |model| {
                    model.assigned_to = Set(Some(assignee));
                },
            )
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::OrderAssigned { order_id, assignee }).await;
        Ok(after)
    }

    /// Assigns without touching the status. The change still lands in the
    /// audit trail.
    #[instrument(skip(self), fields(order_id = %order_id, assignee = %assignee))]
    pub async fn assign_order(
        &self,
        order_id: Uuid,
        assignee: Uuid,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        if before.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot assign order {}: status {} is terminal",
                order_id, before.status
            )));
        }

        let update = order::ActiveModel {
            assigned_to: Set(Some(assignee)),
            ..Default::default()
        };
        let old_status = before.status;
        let (after, changes) = self.persist_update_in_txn(&txn, before, update, actor).await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::OrderAssigned { order_id, assignee }).await;
        Ok(after)
    }

    /// Applies a partial edit of the tracked descriptive fields.
    #[instrument(skip(self, patch), fields(order_id = %order_id))]
    pub async fn update_order_details(
        &self,
        order_id: Uuid,
        patch: OrderDetailsPatch,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        if before.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot update order {}: status {} is terminal",
                order_id, before.status
            )));
        }
        if patch.is_empty() {
            return Ok(before);
        }

        let mut update = <order::ActiveModel as sea_orm::ActiveModelTrait>::default();
        if let Some(title) = patch.title {
            if title.is_empty() {
                return Err(ServiceError::ValidationError(
                    "Title cannot be empty".to_string(),
                ));
            }
            update.title = Set(title);
        }
        if let Some(description) = patch.description {
            update.description = Set(Some(description));
        }
        if let Some(notes) = patch.notes {
            update.notes = Set(Some(notes));
        }
        if let Some(priority) = patch.priority {
            update.priority = Set(priority);
        }
        if let Some(category_id) = patch.category_id {
            update.category_id = Set(Some(category_id));
        }
        if let Some(estimated) = patch.estimated_completion {
            update.estimated_completion = Set(Some(estimated));
        }

        let old_status = before.status;
        let (after, changes) = self.persist_update_in_txn(&txn, before, update, actor).await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        Ok(after)
    }

    /// Parks the order. The pre-hold status stays recoverable through the
    /// audit trail.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn hold_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::OnHold),
                OrderStatus::OnHold,
                actor,
                |model| {
                    if let Some(reason) = reason {
                        model.notes = Set(Some(reason));
                    }
                },
            )
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::OrderOnHold(order_id)).await;
        Ok(after)
    }

    /// Puts a held order back into the status it had before the hold,
    /// recovered from the newest matching history row.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn resume_order(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        ensure_status(&before, &[OrderStatus::OnHold], "resume the order")?;

        let hold_entry = order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .filter(order_history::Column::Field.eq(TrackedField::Status.to_string()))
            .filter(order_history::Column::NewValue.eq(OrderStatus::OnHold.to_string()))
            .order_by_desc(order_history::Column::Id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidStatus(format!(
                    "order {} has no hold history to resume from",
                    order_id
                ))
            })?;

        let prior = hold_entry
            .old_value
            .as_deref()
            .ok_or_else(|| {
                ServiceError::InvalidStatus(format!(
                    "hold history for order {} is missing the prior status",
                    order_id
                ))
            })
            .and_then(OrderStatus::parse)?;

        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(&txn, before, &[OrderStatus::OnHold], prior, actor, |_| {})
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.run_follow_ups(after, actor).await
    }

    /// Cancels an order that has not yet been delivered.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::Cancelled),
                OrderStatus::Cancelled,
                actor,
                |model| {
                    if let Some(reason) = reason {
                        model.notes = Set(Some(reason));
                    }
                },
            )
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::OrderCancelled(order_id)).await;
        Ok(after)
    }

    /// Adds a payment; the order lands in `Paid` once the authorized total
    /// is covered and `NotPaid` otherwise.
    #[instrument(skip(self), fields(order_id = %order_id, amount = %amount))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        ensure_status(
            &before,
            &[OrderStatus::Delivered, OrderStatus::NotPaid],
            "record a payment",
        )?;

        let motor = motor_info::Entity::find()
            .filter(motor_info::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Motor info for order {} not found", order_id))
            })?;
        let paid_so_far = motor.down_payment;
        let mut active: motor_info::ActiveModel = motor.into();
        active.down_payment = Set(paid_so_far + amount);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        let order_totals = totals::recalculate(&txn, order_id).await?;
        let target = if order_totals.is_fully_paid {
            OrderStatus::Paid
        } else {
            OrderStatus::NotPaid
        };

        if before.status == target {
            // Partial payment on an already not-paid order: keep the money,
            // skip the no-op transition.
            txn.commit().await?;
            self.emit(Event::PaymentRecorded { order_id, amount }).await;
            return load_order(&*self.db, order_id).await;
        }

        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                &[OrderStatus::Delivered, OrderStatus::NotPaid],
                target,
                actor,
                |_| {},
            )
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.emit(Event::PaymentRecorded { order_id, amount }).await;
        self.run_follow_ups(after, actor).await
    }

    /// Paid → Completed; the order is closed out.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn close_order(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.apply_transition(order_id, OrderStatus::Completed, actor)
            .await
    }

    /// Delivered/NotPaid → Returned, with an optional reason.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_returned(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(
                &txn,
                before,
                allowed_sources(OrderStatus::Returned),
                OrderStatus::Returned,
                actor,
                |model| {
                    if let Some(reason) = reason {
                        model.notes = Set(Some(reason));
                    }
                },
            )
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        Ok(after)
    }

    /// Retrieves an order by ID
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// The order's audit trail, oldest first.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_history::Model>, ServiceError> {
        Ok(order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_history::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Loads the order with motor info, items, components and services.
    pub async fn load_details(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;
        let order = load_order(db, order_id).await?;

        let motor = motor_info::Entity::find()
            .filter(motor_info::Column::OrderId.eq(order_id))
            .one(db)
            .await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;

        let mut item_details = Vec::with_capacity(items.len());
        for item in items {
            let components = order_item_component::Entity::find()
                .filter(order_item_component::Column::OrderItemId.eq(item.id))
                .all(db)
                .await?;
            item_details.push(ItemDetails { item, components });
        }

        let services = order_service::Entity::find()
            .filter(order_service::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        Ok(OrderDetails {
            order,
            motor_info: motor,
            items: item_details,
            services,
        })
    }

    /// Single guarded hop in its own transaction, with side effects and
    /// follow-ups applied after commit.
    async fn apply_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = load_order(&txn, order_id).await?;
        let old_status = before.status;
        let (after, changes) = self
            .transition_in_txn(&txn, before, allowed_sources(target), target, actor, |_| {})
            .await?;
        txn.commit().await?;

        self.after_commit(old_status, &after, &changes).await;
        self.run_follow_ups(after, actor).await
    }

    /// Validates the precondition against the status read inside this
    /// transaction, then finalizes the order row: status and `updated_by`
    /// land together in one version-guarded update, and the history rows
    /// join the same transaction.
    async fn transition_in_txn(
        &self,
        txn: &DatabaseTransaction,
        before: order::Model,
        allowed: &[OrderStatus],
        target: OrderStatus,
        actor: Uuid,
        customize: impl FnOnce(&mut order::ActiveModel),
    ) -> Result<(order::Model, Vec<FieldChange>), ServiceError> {
        ensure_status(&before, allowed, &format!("transition to {}", target))?;

        let now = Utc::now();
        let mut update = order::ActiveModel {
            status: Set(target),
            ..Default::default()
        };
        if target == OrderStatus::Delivered {
            update.actual_completion = Set(Some(now));
        }
        customize(&mut update);

        self.persist_update_in_txn(txn, before, update, actor).await
    }

    /// Executes a version-guarded order update, reloads the row, and records
    /// the tracked-field delta into the audit trail.
    async fn persist_update_in_txn(
        &self,
        txn: &DatabaseTransaction,
        before: order::Model,
        mut update: order::ActiveModel,
        actor: Uuid,
    ) -> Result<(order::Model, Vec<FieldChange>), ServiceError> {
        update.updated_by = Set(actor);
        update.updated_at = Set(Some(Utc::now()));
        update.version = Set(before.version + 1);

        let result = order::Entity::update_many()
            .set(update)
            .filter(order::Column::Id.eq(before.id))
            .filter(order::Column::Version.eq(before.version))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %before.id, "lost update race on order row");
            return Err(ServiceError::ConcurrentModification(before.id));
        }

        let after = load_order(txn, before.id).await?;
        let changes = diff(&before, &after);
        self.observer
            .record_changes(txn, before.id, &changes, actor)
            .await?;

        Ok((after, changes))
    }

    /// Post-commit side of a mutation: queue notifications, publish the
    /// status-change event.
    async fn after_commit(
        &self,
        old_status: OrderStatus,
        order: &order::Model,
        changes: &[FieldChange],
    ) {
        self.observer.notify(old_status, order, changes).await;

        if old_status != order.status {
            self.emit(Event::OrderStatusChanged {
                order_id: order.id,
                old_status,
                new_status: order.status,
            })
            .await;
        }
    }

    /// Applies chained transitions from the follow-up table until none
    /// matches. The hop counter guards against a cyclic table.
    async fn run_follow_ups(
        &self,
        mut current: order::Model,
        actor: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let mut hops = 0usize;
        while let Some(next) = follow_up(current.status) {
            hops += 1;
            if hops > OrderStatus::ALL.len() {
                return Err(ServiceError::InternalError(
                    "follow-up transition table contains a cycle".to_string(),
                ));
            }

            let txn = self.db.begin().await?;
            let before = load_order(&txn, current.id).await?;
            let old_status = before.status;
            let (after, changes) = self
                .transition_in_txn(&txn, before, allowed_sources(next), next, actor, |_| {})
                .await?;
            txn.commit().await?;

            self.after_commit(old_status, &after, &changes).await;
            current = after;
        }
        Ok(current)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "Failed to send event");
            }
        }
    }
}
