//! Database entities for the work-order aggregate.

pub mod motor_info;
pub mod order;
pub mod order_history;
pub mod order_item;
pub mod order_item_component;
pub mod order_service;
pub mod service_catalog;
