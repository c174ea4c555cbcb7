//! Derived cost aggregates.
//!
//! Recalculation runs inside the caller's transaction, before any status
//! transition that depends on pricing. It never bumps the order's `version`:
//! the version column guards lifecycle mutations, and totals are derived
//! data.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

use crate::entities::{motor_info, order, order_service};
use crate::errors::ServiceError;

/// Snapshot of the recomputed aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTotals {
    /// Sum of net prices over budgeted services (the quote).
    pub budgeted: Decimal,
    /// Sum of net prices over authorized services (the payable amount).
    pub authorized: Decimal,
    pub is_fully_paid: bool,
}

/// Pure summation over a set of service lines.
pub fn totals_of(services: &[order_service::Model]) -> (Decimal, Decimal) {
    let budgeted = services
        .iter()
        .filter(|s| s.is_budgeted)
        .map(|s| s.net_price)
        .sum();
    let authorized = services
        .iter()
        .filter(|s| s.is_authorized)
        .map(|s| s.net_price)
        .sum();
    (budgeted, authorized)
}

/// Recomputes the order's cost fields from its services and stores them on
/// the order row and its motor-info record. Idempotent.
pub async fn recalculate<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderTotals, ServiceError> {
    let services = order_service::Entity::find()
        .filter(order_service::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    let (budgeted, authorized) = totals_of(&services);

    order::Entity::update_many()
        .col_expr(order::Column::TotalCost, Expr::value(budgeted))
        .filter(order::Column::Id.eq(order_id))
        .exec(conn)
        .await?;

    let motor = motor_info::Entity::find()
        .filter(motor_info::Column::OrderId.eq(order_id))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Motor info for order {} not found", order_id))
        })?;

    let is_fully_paid = authorized > Decimal::ZERO && motor.down_payment >= authorized;

    let mut active: motor_info::ActiveModel = motor.into();
    active.total_cost = Set(authorized);
    active.is_fully_paid = Set(is_fully_paid);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await?;

    debug!(
        order_id = %order_id,
        budgeted = %budgeted,
        authorized = %authorized,
        "order totals recalculated"
    );

    Ok(OrderTotals {
        budgeted,
        authorized,
        is_fully_paid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn service_line(net: Decimal, budgeted: bool, authorized: bool) -> order_service::Model {
        order_service::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            order_item_id: Uuid::new_v4(),
            service_key: "surface_grinding".to_string(),
            measurement: None,
            is_budgeted: budgeted,
            base_price: net,
            net_price: net,
            is_authorized: authorized,
            is_completed: false,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn sums_budgeted_and_authorized_independently() {
        let services = vec![
            service_line(dec!(100.00), true, true),
            service_line(dec!(40.50), true, false),
            service_line(dec!(9.99), false, false),
        ];
        let (budgeted, authorized) = totals_of(&services);
        assert_eq!(budgeted, dec!(140.50));
        assert_eq!(authorized, dec!(100.00));
    }

    #[test]
    fn empty_service_set_sums_to_zero() {
        let (budgeted, authorized) = totals_of(&[]);
        assert_eq!(budgeted, Decimal::ZERO);
        assert_eq!(authorized, Decimal::ZERO);
    }

    proptest! {
        // Authorization implies budgeting in real flows, so the authorized
        // total can never exceed the budgeted one.
        #[test]
        fn authorized_total_never_exceeds_budgeted(prices in proptest::collection::vec(0u64..100_000, 0..20), authorized_mask in proptest::collection::vec(any::<bool>(), 0..20)) {
            let services: Vec<_> = prices
                .iter()
                .zip(authorized_mask.iter().chain(std::iter::repeat(&false)))
                .map(|(cents, authorized)| {
                    let net = Decimal::new(*cents as i64, 2);
                    service_line(net, true, *authorized)
                })
                .collect();
            let (budgeted, authorized) = totals_of(&services);
            prop_assert!(authorized <= budgeted);

            // Summation is deterministic.
            let again = totals_of(&services);
            prop_assert_eq!((budgeted, authorized), again);
        }
    }
}
