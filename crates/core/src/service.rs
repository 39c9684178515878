use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySummary {
    pub id: String,
    #[serde(default)]
    pub arn: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "Type", default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub aws_managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyTarget {
    pub target_id: String,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub target_type: Option<String>,
}

/// Faults reported by the organizations service, classified so callers can
/// match on the conditions they tolerate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrgError {
    #[error("policy {policy_id} is in use: {message}")]
    PolicyInUse { policy_id: String, message: String },
    #[error("policy {policy_id} is not attached to {target_id}")]
    PolicyNotAttached { policy_id: String, target_id: String },
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("{code}: {message}")]
    Service { code: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    /// Every policy of `policy_type`, all pages.
    async fn list_policies(&self, policy_type: &str) -> Result<Vec<PolicySummary>, OrgError>;
    async fn list_targets_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyTarget>, OrgError>;
    async fn create_policy(
        &self,
        content: &str,
        description: &str,
        name: &str,
        policy_type: &str,
    ) -> Result<PolicySummary, OrgError>;
    async fn delete_policy(&self, policy_id: &str) -> Result<(), OrgError>;
    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError>;
    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError>;
}
