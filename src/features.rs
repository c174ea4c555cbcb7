//! Feature rollout for the motor-info/items intake step.
//!
//! The resolved decision is passed *into* `create_order` so the lifecycle
//! engine never reads ambient flag state.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::Role;

/// Rollout state of the "motor-items" intake feature.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MotorItemsRollout {
    /// Staff roles get the feature as soon as this is on.
    pub staff_enabled: bool,
    /// Customers get it once this date has passed; `None` keeps it staff-only.
    pub rollout_date: Option<DateTime<Utc>>,
}

impl Default for MotorItemsRollout {
    fn default() -> Self {
        Self {
            staff_enabled: true,
            rollout_date: None,
        }
    }
}

/// Resolved yes/no handed to `create_order`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotorItemsDecision(bool);

impl MotorItemsDecision {
    pub fn enabled() -> Self {
        Self(true)
    }

    pub fn disabled() -> Self {
        Self(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.0
    }
}

impl MotorItemsRollout {
    /// Staff follow `staff_enabled`; customers (and anyone unauthenticated,
    /// which callers pass as `None`) wait for the rollout date.
    pub fn decide(&self, role: Option<Role>, now: DateTime<Utc>) -> MotorItemsDecision {
        match role {
            Some(role) if role.is_staff() => MotorItemsDecision(self.staff_enabled),
            _ => {
                let rolled_out = self
                    .rollout_date
                    .map(|date| now >= date)
                    .unwrap_or(false);
                MotorItemsDecision(rolled_out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staff_follow_the_staff_switch() {
        let rollout = MotorItemsRollout::default();
        let now = Utc::now();
        assert!(rollout.decide(Some(Role::Employee), now).is_enabled());
        assert!(rollout.decide(Some(Role::Administrator), now).is_enabled());

        let off = MotorItemsRollout {
            staff_enabled: false,
            rollout_date: None,
        };
        assert!(!off.decide(Some(Role::Employee), now).is_enabled());
    }

    #[test]
    fn customers_wait_for_the_rollout_date() {
        let now = Utc::now();
        let rollout = MotorItemsRollout {
            staff_enabled: true,
            rollout_date: Some(now + Duration::days(7)),
        };
        assert!(!rollout.decide(Some(Role::Customer), now).is_enabled());
        assert!(rollout
            .decide(Some(Role::Customer), now + Duration::days(8))
            .is_enabled());
    }

    #[test]
    fn unauthenticated_context_defaults_off() {
        let rollout = MotorItemsRollout::default();
        assert!(!rollout.decide(None, Utc::now()).is_enabled());
    }
}
