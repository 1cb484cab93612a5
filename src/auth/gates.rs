use serde::Serialize;

use crate::auth::policy::has_required_plan;
use crate::models::{departments::PlanTier, users::Role};

/// Outcome of a plan gate evaluation, serialized into entitlement payloads.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    Granted,
    /// Denied with a fixed upgrade prompt naming the required tier.
    UpgradeRequired {
        required_plan: PlanTier,
        upgrade_prompt: String,
    },
}

/// Role gate: literal membership check, no hierarchy expansion.
///
/// Callers must enumerate every acceptable role. A missing role renders
/// nothing; SuperAdmin is always let through.
pub fn role_gate(allowed: &[Role], current: Option<Role>) -> bool {
    let Some(role) = current else {
        return false;
    };
    if role == Role::SuperAdmin {
        return true;
    }

    allowed.contains(&role)
}

/// Plan gate: delegates to the plan policy and carries the upgrade prompt on denial.
pub fn plan_gate(
    minimum: PlanTier,
    current: Option<PlanTier>,
    user_role: Option<Role>,
) -> GateOutcome {
    if has_required_plan(current, minimum, user_role) {
        return GateOutcome::Granted;
    }

    GateOutcome::UpgradeRequired {
        required_plan: minimum,
        upgrade_prompt: format!(
            "This feature requires the {} plan or higher.",
            minimum.display_name()
        ),
    }
}
