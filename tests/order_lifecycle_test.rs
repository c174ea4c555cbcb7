//! End-to-end tests for the complete order lifecycle.
//!
//! Covers the full journey: intake (Received → AwaitingReview), budgeting
//! (→ Reviewed → AwaitingCustomerApproval), customer approval
//! (→ ReadyForWork), completion and delivery, with the audit trail and
//! notification fan-out asserted at every hop.

mod common;

use assert_matches::assert_matches;
use common::{sample_request, TestApp};
use rust_decimal_macros::dec;
use uuid::Uuid;

use motorshop_api::errors::ServiceError;
use motorshop_api::features::MotorItemsDecision;
use motorshop_api::models::{ItemType, OrderStatus};
use motorshop_api::notifications::{AUDIT_TOPIC, MAIL_TOPIC};
use motorshop_api::services::order_lifecycle::BudgetLine;

fn events_of(messages: &[motorshop_api::message_queue::Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.payload["event"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn full_lifecycle_from_intake_to_delivery() {
    let app = TestApp::new().await;
    app.seed_catalog_entry(
        "valve_seat_recondition",
        "Valve seat reconditioning",
        dec!(120.00),
        dec!(100.00),
    )
    .await;

    let customer = Uuid::new_v4();
    let staff = Uuid::new_v4();

    // Intake: order, motor info, one item with one component, then the
    // automatic hop into the review queue.
    let details = app
        .lifecycle
        .create_order(sample_request(customer), staff, MotorItemsDecision::enabled())
        .await
        .expect("order creation failed");

    let order_id = details.order.id;
    assert_eq!(details.order.status, OrderStatus::AwaitingReview);
    assert!(details.order.order_number.starts_with("WO-"));
    assert_eq!(details.order.created_by, staff);
    assert_eq!(details.order.updated_by, staff);

    let motor = details.motor_info.as_ref().expect("motor info missing");
    assert_eq!(motor.down_payment, dec!(0));
    assert_eq!(motor.total_cost, dec!(0));
    assert!(!motor.is_fully_paid);

    assert_eq!(details.items.len(), 1);
    let item = &details.items[0];
    assert_eq!(item.item.item_type, ItemType::CylinderHead);
    assert!(item.item.is_received);
    assert_eq!(item.components.len(), 1);
    assert_eq!(item.components[0].name, "valve seat");
    assert!(item.components[0].is_received);

    // created → creator mail; AwaitingReview → customer mail. One audit
    // copy each.
    let mail = app.drain_topic(MAIL_TOPIC).await;
    assert_eq!(
        events_of(&mail),
        vec!["order_created".to_string(), "order_received".to_string()]
    );
    let audit = app.drain_topic(AUDIT_TOPIC).await;
    assert_eq!(audit.len(), 2);

    let history = app.lifecycle.history(order_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].field, "status");
    assert_eq!(history[0].old_value.as_deref(), Some("Received"));
    assert_eq!(history[0].new_value.as_deref(), Some("AwaitingReview"));
    assert_eq!(history[0].changed_by, staff);

    // Budgeting: one priced line, then the auto-chain to approval.
    let details = app
        .lifecycle
        .submit_budget(
            order_id,
            vec![BudgetLine {
                order_item_id: item.item.id,
                service_key: "valve_seat_recondition".to_string(),
                measurement: Some("0.15mm skim".to_string()),
            }],
            staff,
        )
        .await
        .expect("budget submission failed");

    assert_eq!(details.order.status, OrderStatus::AwaitingCustomerApproval);
    assert_eq!(details.order.total_cost, dec!(100.00));
    assert_eq!(details.services.len(), 1);
    let service = &details.services[0];
    assert!(service.is_budgeted);
    assert!(!service.is_authorized);
    assert_eq!(service.base_price, dec!(120.00));
    assert_eq!(service.net_price, dec!(100.00));
    assert_eq!(service.measurement.as_deref(), Some("0.15mm skim"));

    // Two transitions (Reviewed, then the chained approval hop): one
    // customer mail and one audit copy each.
    let mail = app.drain_topic(MAIL_TOPIC).await;
    assert_eq!(
        events_of(&mail),
        vec![
            "budget_ready_for_approval".to_string(),
            "budget_ready_for_approval".to_string()
        ]
    );
    assert_eq!(app.drain_topic(AUDIT_TOPIC).await.len(), 2);

    let history = app.lifecycle.history(order_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].old_value.as_deref(), Some("AwaitingReview"));
    assert_eq!(history[1].new_value.as_deref(), Some("Reviewed"));
    assert_eq!(history[2].old_value.as_deref(), Some("Reviewed"));
    assert_eq!(
        history[2].new_value.as_deref(),
        Some("AwaitingCustomerApproval")
    );

    // Customer approval with a down payment.
    let details = app
        .lifecycle
        .customer_approval(order_id, vec![service.id], Some(dec!(50.0)), customer)
        .await
        .expect("customer approval failed");

    assert_eq!(details.order.status, OrderStatus::ReadyForWork);
    assert_eq!(details.order.updated_by, customer);
    let motor = details.motor_info.as_ref().unwrap();
    assert_eq!(motor.down_payment, dec!(50.0));
    assert_eq!(motor.total_cost, dec!(100.00));
    assert!(!motor.is_fully_paid);
    assert!(details.services[0].is_authorized);

    let mail = app.drain_topic(MAIL_TOPIC).await;
    assert_eq!(events_of(&mail), vec!["work_approved".to_string()]);
    assert_eq!(app.drain_topic(AUDIT_TOPIC).await.len(), 1);

    // Completing the work leaves the status alone.
    let completed = app
        .lifecycle
        .mark_work_completed(order_id, vec![service.id], staff)
        .await
        .unwrap();
    assert_eq!(completed, 1);
    let order = app.lifecycle.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::ReadyForWork);
    assert!(app.drain_topic(MAIL_TOPIC).await.is_empty());
    assert!(app.drain_topic(AUDIT_TOPIC).await.is_empty());

    // Ready for delivery, then delivery.
    let order = app
        .lifecycle
        .mark_ready_for_delivery(order_id, staff)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::ReadyForDelivery);
    assert_eq!(
        events_of(&app.drain_topic(MAIL_TOPIC).await),
        vec!["ready_for_delivery".to_string()]
    );
    assert_eq!(app.drain_topic(AUDIT_TOPIC).await.len(), 1);

    let order = app.lifecycle.deliver_order(order_id, staff).await.unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.actual_completion.is_some());
    assert_eq!(
        events_of(&app.drain_topic(MAIL_TOPIC).await),
        vec!["order_delivered".to_string()]
    );
    assert_eq!(app.drain_topic(AUDIT_TOPIC).await.len(), 1);

    // The status audit trail is gap-free: each row's old value equals the
    // previous row's new value.
    let history = app.lifecycle.history(order_id).await.unwrap();
    let status_rows: Vec<_> = history.iter().filter(|h| h.field == "status").collect();
    assert_eq!(status_rows.len(), 6);
    for window in status_rows.windows(2) {
        assert_eq!(window[0].new_value, window[1].old_value);
    }
    assert_eq!(status_rows[0].old_value.as_deref(), Some("Received"));
    assert_eq!(
        status_rows.last().unwrap().new_value.as_deref(),
        Some("Delivered")
    );
}

#[tokio::test]
async fn budget_submission_requires_awaiting_review() {
    let app = TestApp::new().await;
    app.seed_catalog_entry("crank_polish", "Crankshaft polishing", dec!(80), dec!(65))
        .await;

    let staff = Uuid::new_v4();
    let details = app
        .lifecycle
        .create_order(
            sample_request(Uuid::new_v4()),
            staff,
            MotorItemsDecision::enabled(),
        )
        .await
        .unwrap();
    let item_id = details.items[0].item.id;

    // First budget moves the order past AwaitingReview...
    app.lifecycle
        .submit_budget(
            details.order.id,
            vec![BudgetLine {
                order_item_id: item_id,
                service_key: "crank_polish".to_string(),
                measurement: None,
            }],
            staff,
        )
        .await
        .unwrap();

    // ...so a second submission must fail, naming both sides of the guard.
    let err = app
        .lifecycle
        .submit_budget(
            details.order.id,
            vec![BudgetLine {
                order_item_id: item_id,
                service_key: "crank_polish".to_string(),
                measurement: None,
            }],
            staff,
        )
        .await
        .unwrap_err();

    match err {
        ServiceError::InvalidStatus(message) => {
            assert!(message.contains("AwaitingReview"));
            assert!(message.contains("AwaitingCustomerApproval"));
        }
        other => panic!("expected InvalidStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn delivery_requires_ready_for_delivery() {
    let app = TestApp::new().await;
    let details = app
        .lifecycle
        .create_order(
            sample_request(Uuid::new_v4()),
            Uuid::new_v4(),
            MotorItemsDecision::enabled(),
        )
        .await
        .unwrap();

    let err = app
        .lifecycle
        .deliver_order(details.order.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn failed_approval_mutates_nothing() {
    let app = TestApp::new().await;
    let details = app
        .lifecycle
        .create_order(
            sample_request(Uuid::new_v4()),
            Uuid::new_v4(),
            MotorItemsDecision::enabled(),
        )
        .await
        .unwrap();
    let order_id = details.order.id;

    // Order is AwaitingReview, not AwaitingCustomerApproval.
    let err = app
        .lifecycle
        .customer_approval(order_id, vec![Uuid::new_v4()], Some(dec!(75)), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));

    let details = app.lifecycle.load_details(order_id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::AwaitingReview);
    assert_eq!(details.motor_info.unwrap().down_payment, dec!(0));
    assert!(details.services.is_empty());
}

#[tokio::test]
async fn disabled_motor_items_flag_skips_intake_items() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();

    let details = app
        .lifecycle
        .create_order(
            sample_request(customer),
            customer,
            MotorItemsDecision::disabled(),
        )
        .await
        .unwrap();

    // Items were not collected, but the order still reached the review
    // queue and the motor-info record exists for later payments.
    assert!(details.items.is_empty());
    assert_eq!(details.order.status, OrderStatus::AwaitingReview);
    assert!(details.motor_info.is_some());
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let err = app
        .lifecycle
        .deliver_order(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
