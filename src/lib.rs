//! Motorshop API Library
//!
//! Work-order lifecycle services for an engine-repair shop: intake,
//! budgeting, customer approval, workshop tracking, delivery and payment.
//! HTTP routing, mail transport and file storage are collaborators wired up
//! by the embedding application.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod features;
pub mod logging;
pub mod message_queue;
pub mod models;
pub mod notifications;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

use crate::message_queue::InMemoryMessageQueue;
use crate::notifications::{
    LoggingMailChannel, NotificationDispatcher, NotificationWorker, WorkerSettings,
};
use crate::services::order_lifecycle::OrderLifecycleService;
use crate::services::order_observer::OrderObserver;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub lifecycle: Arc<OrderLifecycleService>,
    pub notification_worker: Arc<NotificationWorker>,
}

/// Wires queue, dispatcher, observer and lifecycle service together.
/// Returns the state plus the receiving end of the domain-event channel;
/// callers usually hand the receiver to [`events::process_events`].
pub fn build_state(
    db: Arc<DatabaseConnection>,
    config: config::AppConfig,
) -> (AppState, mpsc::Receiver<events::Event>) {
    let (tx, rx) = mpsc::channel(128);
    let event_sender = events::EventSender::new(tx);

    let queue = Arc::new(InMemoryMessageQueue::with_max_size(
        config.notifications.queue_capacity,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        queue.clone(),
        config.notifications.max_retries,
    ));
    let observer = Arc::new(OrderObserver::new(dispatcher));
    let lifecycle = Arc::new(OrderLifecycleService::new(
        db.clone(),
        observer,
        Some(Arc::new(event_sender.clone())),
    ));
    let notification_worker = Arc::new(NotificationWorker::new(
        queue,
        Arc::new(LoggingMailChannel),
        WorkerSettings {
            attempt_timeout: Duration::from_secs(config.notifications.attempt_timeout_secs),
            idle_backoff: Duration::from_millis(config.notifications.idle_backoff_ms),
        },
    ));

    let state = AppState {
        db,
        config,
        event_sender,
        lifecycle,
        notification_worker,
    };

    (state, rx)
}
