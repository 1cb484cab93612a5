use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// Synchronization state of the organization against the identity provider.
///
/// Pending means the Auth0 organization has not been created yet (webhook
/// provisioning committed before the management API call succeeded); Failed
/// means the call was attempted and rejected. A reconciliation job can pick
/// both up by filtering on this column instead of parsing placeholder ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "core.sync_status", rename_all = "lowercase")]
pub enum ExternalSyncStatus {
    Pending,
    Synced,
    Failed,
}

/// Organization model mapped to core.organization. The tenant root.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub auth0_org_id: Option<String>,
    pub external_sync_status: ExternalSyncStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
