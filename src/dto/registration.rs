use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrgRequest {
    pub organization_name: String,
    pub admin_email: String,
    /// Required; kept optional at the serde level so a missing field is
    /// answered with the usecase's 400 instead of a body rejection.
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrgResponse {
    pub success: bool,
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when org creation succeeded but the admin invitation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
