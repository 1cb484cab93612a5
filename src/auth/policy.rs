use crate::models::{departments::PlanTier, users::Role};

/// Returns true when the user holds the required role or a higher one.
///
/// A missing role always fails. SuperAdmin passes every check.
pub fn has_required_role(user_role: Option<Role>, required: Role) -> bool {
    let Some(role) = user_role else {
        return false;
    };
    if role == Role::SuperAdmin {
        return true;
    }

    role.level() >= required.level()
}

/// Returns true when the organization's plan meets the required tier.
///
/// SuperAdmin bypasses the plan check entirely, even when no plan is set.
pub fn has_required_plan(
    org_plan: Option<PlanTier>,
    required: PlanTier,
    user_role: Option<Role>,
) -> bool {
    if user_role == Some(Role::SuperAdmin) {
        return true;
    }
    let Some(plan) = org_plan else {
        return false;
    };

    plan.level() >= required.level()
}

#[cfg(test)]
mod tests {
    use super::{has_required_plan, has_required_role};
    use crate::models::{departments::PlanTier, users::Role};

    #[test]
    fn super_admin_passes_any_role_check() {
        for required in [Role::Viewer, Role::Operator, Role::Admin, Role::SuperAdmin] {
            assert!(has_required_role(Some(Role::SuperAdmin), required));
        }
    }

    #[test]
    fn role_hierarchy_is_enforced() {
        assert!(!has_required_role(Some(Role::Viewer), Role::Admin));
        assert!(has_required_role(Some(Role::Admin), Role::Operator));
        assert!(has_required_role(Some(Role::Operator), Role::Operator));
        assert!(!has_required_role(Some(Role::Operator), Role::Admin));
    }

    #[test]
    fn missing_role_always_fails() {
        assert!(!has_required_role(None, Role::Viewer));
        assert!(!has_required_role(None, Role::SuperAdmin));
    }

    #[test]
    fn plan_hierarchy_is_enforced() {
        assert!(!has_required_plan(
            Some(PlanTier::Starter),
            PlanTier::IndustrialPro,
            Some(Role::Admin)
        ));
        assert!(has_required_plan(
            Some(PlanTier::Executive),
            PlanTier::Starter,
            Some(Role::Viewer)
        ));
    }

    #[test]
    fn super_admin_bypasses_plan_check_even_without_plan() {
        assert!(has_required_plan(
            None,
            PlanTier::Executive,
            Some(Role::SuperAdmin)
        ));
        assert!(has_required_plan(
            Some(PlanTier::Starter),
            PlanTier::Executive,
            Some(Role::SuperAdmin)
        ));
    }

    #[test]
    fn missing_plan_fails_for_everyone_else() {
        assert!(!has_required_plan(None, PlanTier::Starter, Some(Role::Admin)));
        assert!(!has_required_plan(None, PlanTier::Starter, None));
    }
}
