//! Role-based permission matrix.
//!
//! This is a collaborator of the lifecycle engine, not part of it: callers
//! check permissions *before* invoking an operation, and the engine trusts
//! that the gate already ran. Everything here is a pure lookup.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::order;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Role {
    SuperAdministrator,
    Administrator,
    Employee,
    Customer,
}

impl Role {
    /// Staff roles act on orders they did not place themselves.
    pub fn is_staff(&self) -> bool {
        matches!(
            self,
            Role::SuperAdministrator | Role::Administrator | Role::Employee
        )
    }

    /// Administrator and above act on any order.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SuperAdministrator | Role::Administrator)
    }
}

const SUPER_ADMIN_PERMISSIONS: &[&str] = &[
    "orders.viewAny",
    "orders.view",
    "orders.create",
    "orders.update",
    "orders.assign",
    "orders.delete",
    "orders.budget",
    "orders.approve",
    "history.view",
];

const ADMIN_PERMISSIONS: &[&str] = &[
    "orders.viewAny",
    "orders.view",
    "orders.create",
    "orders.update",
    "orders.assign",
    "orders.budget",
    "orders.approve",
    "history.view",
];

const EMPLOYEE_PERMISSIONS: &[&str] = &[
    "orders.view",
    "orders.create",
    "orders.update",
    "orders.budget",
    "history.view",
];

const CUSTOMER_PERMISSIONS: &[&str] = &["orders.view", "orders.approve"];

/// The static permission set of a role.
pub fn permissions_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::SuperAdministrator => SUPER_ADMIN_PERMISSIONS,
        Role::Administrator => ADMIN_PERMISSIONS,
        Role::Employee => EMPLOYEE_PERMISSIONS,
        Role::Customer => CUSTOMER_PERMISSIONS,
    }
}

pub fn has_permission(role: Role, permission: &str) -> bool {
    permissions_for(role).contains(&permission)
}

/// Customers see their own orders; employees see orders they created or are
/// assigned to; administrators see everything.
pub fn can_view_order(role: Role, actor: Uuid, order: &order::Model) -> bool {
    if role.is_admin() {
        return true;
    }
    match role {
        Role::Employee => order.created_by == actor || order.assigned_to == Some(actor),
        Role::Customer => order.customer_id == actor,
        _ => true,
    }
}

/// Employees mutate only orders they created or are assigned to.
pub fn can_update_order(role: Role, actor: Uuid, order: &order::Model) -> bool {
    match role {
        Role::SuperAdministrator | Role::Administrator => true,
        Role::Employee => order.created_by == actor || order.assigned_to == Some(actor),
        Role::Customer => false,
    }
}

pub fn can_assign(role: Role) -> bool {
    role.is_admin()
}

/// Hard deletion is reserved for the top role; history integrity depends
/// on orders not disappearing underneath their audit trail.
pub fn can_delete(role: Role) -> bool {
    matches!(role, Role::SuperAdministrator)
}
