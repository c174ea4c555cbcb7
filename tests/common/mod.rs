//! Shared harness: lifecycle service backed by an in-memory SQLite
//! database with the schema built straight from the entities.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Set,
};
use uuid::Uuid;

use motorshop_api::entities::{
    motor_info, order, order_history, order_item, order_item_component, order_service,
    service_catalog,
};
use motorshop_api::message_queue::{InMemoryMessageQueue, Message, MessageQueue};
use motorshop_api::models::{ItemType, OrderPriority};
use motorshop_api::notifications::NotificationDispatcher;
use motorshop_api::services::order_lifecycle::{
    CreateOrderRequest, MotorInput, OrderItemInput, OrderLifecycleService,
};
use motorshop_api::services::order_observer::OrderObserver;

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub lifecycle: OrderLifecycleService,
    pub queue: Arc<InMemoryMessageQueue>,
}

impl TestApp {
    /// Fresh database and service wiring per test.
    pub async fn new() -> Self {
        // A pooled in-memory SQLite connection must stay on one connection,
        // otherwise each checkout sees an empty database.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options)
            .await
            .expect("failed to open in-memory sqlite");

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let statements = [
            schema.create_table_from_entity(order::Entity),
            schema.create_table_from_entity(motor_info::Entity),
            schema.create_table_from_entity(order_item::Entity),
            schema.create_table_from_entity(order_item_component::Entity),
            schema.create_table_from_entity(order_service::Entity),
            schema.create_table_from_entity(order_history::Entity),
            schema.create_table_from_entity(service_catalog::Entity),
        ];
        for statement in statements {
            db.execute(backend.build(&statement))
                .await
                .expect("failed to create table");
        }

        let db = Arc::new(db);
        let queue = Arc::new(InMemoryMessageQueue::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(queue.clone(), 3));
        let observer = Arc::new(OrderObserver::new(dispatcher));
        let lifecycle = OrderLifecycleService::new(db.clone(), observer, None);

        Self {
            db,
            lifecycle,
            queue,
        }
    }

    #[allow(dead_code)]
    pub async fn seed_catalog_entry(&self, key: &str, label: &str, base: Decimal, net: Decimal) {
        service_catalog::ActiveModel {
            id: Set(Uuid::new_v4()),
            service_key: Set(key.to_string()),
            label: Set(label.to_string()),
            base_price: Set(base),
            net_price: Set(net),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed catalog entry");
    }

    /// Pops every queued message on the topic.
    #[allow(dead_code)]
    pub async fn drain_topic(&self, topic: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.queue.subscribe(topic).await.expect("queue poll") {
            messages.push(message);
        }
        messages
    }
}

/// A plausible intake request: one cylinder head with one component.
#[allow(dead_code)]
pub fn sample_request(customer_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id,
        title: "Cylinder head overhaul".to_string(),
        description: Some("Overheating, suspected warped head".to_string()),
        priority: OrderPriority::Normal,
        category_id: None,
        estimated_completion: None,
        notes: None,
        motor: MotorInput {
            brand: Some("Perkins".to_string()),
            model: Some("1104C".to_string()),
            serial_number: Some("U512836N".to_string()),
            down_payment: None,
        },
        items: vec![OrderItemInput {
            item_type: ItemType::CylinderHead,
            notes: None,
            components: vec!["valve seat".to_string()],
        }],
    }
}
