use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// Plan tier mapping for core.plan_tier, ordered from cheapest upwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "core.plan_tier", rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    IndustrialPro,
    Executive,
}

impl PlanTier {
    /// Hierarchy level used by "at least tier X" checks.
    pub fn level(self) -> u8 {
        match self {
            PlanTier::Starter => 0,
            PlanTier::IndustrialPro => 1,
            PlanTier::Executive => 2,
        }
    }

    /// Label shown in upgrade prompts ("Industrial Pro" instead of INDUSTRIAL_PRO).
    pub fn display_name(self) -> &'static str {
        match self {
            PlanTier::Starter => "Starter",
            PlanTier::IndustrialPro => "Industrial Pro",
            PlanTier::Executive => "Executive",
        }
    }

    /// Parses a plan as it appears in registration payloads and Stripe metadata.
    pub fn from_claim(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STARTER" => Some(PlanTier::Starter),
            "INDUSTRIAL_PRO" | "INDUSTRIAL-PRO" => Some(PlanTier::IndustrialPro),
            "EXECUTIVE" => Some(PlanTier::Executive),
            _ => None,
        }
    }
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Starter
    }
}

/// Subscription status mapping for core.sub_status.
///
/// Transitions happen only through webhook events, never through user input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "core.sub_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

/// Department (workspace) model mapped to core.department, child of one Organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,

    pub sub_status: SubscriptionStatus,
    pub plan: PlanTier,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: Option<String>,

    pub billing_address_id: Option<Uuid>,
    pub shipping_address_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::PlanTier;

    #[test]
    fn plan_levels_are_totally_ordered() {
        assert!(PlanTier::Starter.level() < PlanTier::IndustrialPro.level());
        assert!(PlanTier::IndustrialPro.level() < PlanTier::Executive.level());
    }

    #[test]
    fn plan_claim_parsing_matches_metadata_spelling() {
        assert_eq!(PlanTier::from_claim("INDUSTRIAL_PRO"), Some(PlanTier::IndustrialPro));
        assert_eq!(PlanTier::from_claim("starter"), Some(PlanTier::Starter));
        assert_eq!(PlanTier::from_claim("gold"), None);
    }
}
