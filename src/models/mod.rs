//! Closed-set value types shared across entities and services.
//!
//! Every enum here is string-backed in the database and rejects values
//! outside the set at the parsing boundary.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Enum representing the possible statuses of a work order.
///
/// The canonical lifecycle runs intake → review → budgeting → customer
/// approval → workshop → delivery → payment, with hold/cancel side exits.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "Received")]
    Received,
    #[sea_orm(string_value = "AwaitingReview")]
    AwaitingReview,
    #[sea_orm(string_value = "Reviewed")]
    Reviewed,
    #[sea_orm(string_value = "AwaitingCustomerApproval")]
    AwaitingCustomerApproval,
    #[sea_orm(string_value = "ReadyForWork")]
    ReadyForWork,
    #[sea_orm(string_value = "Open")]
    Open,
    #[sea_orm(string_value = "InProgress")]
    InProgress,
    #[sea_orm(string_value = "ReadyForDelivery")]
    ReadyForDelivery,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Paid")]
    Paid,
    #[sea_orm(string_value = "Returned")]
    Returned,
    #[sea_orm(string_value = "NotPaid")]
    NotPaid,
    #[sea_orm(string_value = "OnHold")]
    OnHold,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Every member of the closed set, in lifecycle order.
    pub const ALL: [OrderStatus; 15] = [
        OrderStatus::Received,
        OrderStatus::AwaitingReview,
        OrderStatus::Reviewed,
        OrderStatus::AwaitingCustomerApproval,
        OrderStatus::ReadyForWork,
        OrderStatus::Open,
        OrderStatus::InProgress,
        OrderStatus::ReadyForDelivery,
        OrderStatus::Completed,
        OrderStatus::Delivered,
        OrderStatus::Paid,
        OrderStatus::Returned,
        OrderStatus::NotPaid,
        OrderStatus::OnHold,
        OrderStatus::Cancelled,
    ];

    /// Human-facing label used in notifications and listings.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Received => "Received",
            OrderStatus::AwaitingReview => "Awaiting review",
            OrderStatus::Reviewed => "Reviewed",
            OrderStatus::AwaitingCustomerApproval => "Awaiting customer approval",
            OrderStatus::ReadyForWork => "Ready for work",
            OrderStatus::Open => "Open",
            OrderStatus::InProgress => "In progress",
            OrderStatus::ReadyForDelivery => "Ready for delivery",
            OrderStatus::Completed => "Completed",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Paid => "Paid",
            OrderStatus::Returned => "Returned",
            OrderStatus::NotPaid => "Not paid",
            OrderStatus::OnHold => "On hold",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Parses external input, rejecting anything outside the closed set.
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value.parse().map_err(|_| {
            ServiceError::ValidationError(format!("'{value}' is not a valid order status"))
        })
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Returned | OrderStatus::Cancelled
        )
    }
}

/// Priority assigned to a work order at intake.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum OrderPriority {
    #[sea_orm(string_value = "Low")]
    Low,
    #[sea_orm(string_value = "Normal")]
    Normal,
    #[sea_orm(string_value = "High")]
    High,
    #[sea_orm(string_value = "Urgent")]
    Urgent,
}

impl OrderPriority {
    pub const ALL: [OrderPriority; 4] = [
        OrderPriority::Low,
        OrderPriority::Normal,
        OrderPriority::High,
        OrderPriority::Urgent,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OrderPriority::Low => "Low",
            OrderPriority::Normal => "Normal",
            OrderPriority::High => "High",
            OrderPriority::Urgent => "Urgent",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value.parse().map_err(|_| {
            ServiceError::ValidationError(format!("'{value}' is not a valid order priority"))
        })
    }
}

/// Major component groups an engine arrives as.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum ItemType {
    #[sea_orm(string_value = "CylinderHead")]
    CylinderHead,
    #[sea_orm(string_value = "EngineBlock")]
    EngineBlock,
    #[sea_orm(string_value = "Crankshaft")]
    Crankshaft,
    #[sea_orm(string_value = "ConnectingRods")]
    ConnectingRods,
    #[sea_orm(string_value = "Other")]
    Other,
}

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::CylinderHead,
        ItemType::EngineBlock,
        ItemType::Crankshaft,
        ItemType::ConnectingRods,
        ItemType::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ItemType::CylinderHead => "Cylinder head",
            ItemType::EngineBlock => "Engine block",
            ItemType::Crankshaft => "Crankshaft",
            ItemType::ConnectingRods => "Connecting rods",
            ItemType::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value.parse().map_err(|_| {
            ServiceError::ValidationError(format!("'{value}' is not a valid item type"))
        })
    }
}

/// Coarse 8-value projection of [`OrderStatus`] used by customer-facing
/// summaries. The 15-value set stays canonical; this is display only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum OrderStage {
    Intake,
    Review,
    Approval,
    Workshop,
    Delivery,
    Closed,
    OnHold,
    Cancelled,
}

impl From<OrderStatus> for OrderStage {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Received => OrderStage::Intake,
            OrderStatus::AwaitingReview | OrderStatus::Reviewed => OrderStage::Review,
            OrderStatus::AwaitingCustomerApproval => OrderStage::Approval,
            OrderStatus::ReadyForWork | OrderStatus::Open | OrderStatus::InProgress => {
                OrderStage::Workshop
            }
            OrderStatus::ReadyForDelivery | OrderStatus::Delivered => OrderStage::Delivery,
            OrderStatus::Completed
            | OrderStatus::Paid
            | OrderStatus::NotPaid
            | OrderStatus::Returned => OrderStage::Closed,
            OrderStatus::OnHold => OrderStage::OnHold,
            OrderStatus::Cancelled => OrderStage::Cancelled,
        }
    }
}

impl OrderStage {
    pub fn label(&self) -> &'static str {
        match self {
            OrderStage::Intake => "Intake",
            OrderStage::Review => "Under review",
            OrderStage::Approval => "Waiting on you",
            OrderStage::Workshop => "In the workshop",
            OrderStage::Delivery => "Delivery",
            OrderStage::Closed => "Closed",
            OrderStage::OnHold => "On hold",
            OrderStage::Cancelled => "Cancelled",
        }
    }
}
