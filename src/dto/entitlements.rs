use serde::Serialize;

use crate::{
    auth::gates::GateOutcome,
    models::{
        departments::{PlanTier, SubscriptionStatus},
        users::Role,
    },
};

/// What the signed-in user is allowed to see, evaluated server side so the
/// frontend gates stay in lockstep with the policy functions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsResponse {
    pub role: Role,
    pub plan: PlanTier,
    pub sub_status: SubscriptionStatus,
    pub can_manage_billing: bool,
    pub can_manage_members: bool,
    pub advanced_reports: GateOutcome,
}
