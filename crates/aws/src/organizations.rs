use async_trait::async_trait;
use orgpol_core::{OrgError, OrganizationsApi, PolicySummary, PolicyTarget};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::{parse_service_fault, AwsCli, CliFailure};

/// `OrganizationsApi` over `aws organizations ...`. The CLI paginates list calls itself.
#[derive(Debug, Clone)]
pub struct CliOrganizations {
    cli: AwsCli,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPoliciesOutput {
    #[serde(default)]
    policies: Vec<PolicySummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListTargetsOutput {
    #[serde(default)]
    targets: Vec<PolicyTarget>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatePolicyOutput {
    policy: CreatedPolicy,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedPolicy {
    policy_summary: PolicySummary,
}

impl CliOrganizations {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    async fn call(&self, operation: &str, args: &[(&str, &str)]) -> Result<Vec<u8>, CliFailure> {
        let mut argv = self.cli.command_args("organizations", operation, args);
        argv.push("--output".into());
        argv.push("json".into());
        self.cli.run(&argv).await
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, OrgError> {
    serde_json::from_slice(bytes).map_err(|e| OrgError::Decode(e.to_string()))
}

/// Maps a CLI failure onto the service taxonomy. `policy_id`/`target_id` fill
/// in the structured variants.
pub(crate) fn classify(failure: CliFailure, policy_id: &str, target_id: &str) -> OrgError {
    let Some(fault) = parse_service_fault(&failure.stderr) else {
        return OrgError::Transport(failure.to_string());
    };
    match fault.code.as_str() {
        "PolicyInUseException" => OrgError::PolicyInUse {
            policy_id: policy_id.to_string(),
            message: fault.message,
        },
        "PolicyNotAttachedException" => OrgError::PolicyNotAttached {
            policy_id: policy_id.to_string(),
            target_id: target_id.to_string(),
        },
        "ConcurrentModificationException" => OrgError::ConcurrentModification(fault.message),
        _ => OrgError::Service { code: fault.code, message: fault.message },
    }
}

#[async_trait]
impl OrganizationsApi for CliOrganizations {
    async fn list_policies(&self, policy_type: &str) -> Result<Vec<PolicySummary>, OrgError> {
        let out = self
            .call("list-policies", &[("filter", policy_type)])
            .await
            .map_err(|f| classify(f, "", ""))?;
        Ok(decode::<ListPoliciesOutput>(&out)?.policies)
    }

    async fn list_targets_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyTarget>, OrgError> {
        let out = self
            .call("list-targets-for-policy", &[("policy-id", policy_id)])
            .await
            .map_err(|f| classify(f, policy_id, ""))?;
        Ok(decode::<ListTargetsOutput>(&out)?.targets)
    }

    async fn create_policy(
        &self,
        content: &str,
        description: &str,
        name: &str,
        policy_type: &str,
    ) -> Result<PolicySummary, OrgError> {
        let out = self
            .call(
                "create-policy",
                &[
                    ("content", content),
                    ("description", description),
                    ("name", name),
                    ("type", policy_type),
                ],
            )
            .await
            .map_err(|f| classify(f, "", ""))?;
        let summary = decode::<CreatePolicyOutput>(&out)?.policy.policy_summary;
        info!(id = %summary.id, %name, "create-policy returned");
        Ok(summary)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<(), OrgError> {
        self.call("delete-policy", &[("policy-id", policy_id)])
            .await
            .map_err(|f| classify(f, policy_id, ""))?;
        Ok(())
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError> {
        self.call("attach-policy", &[("policy-id", policy_id), ("target-id", target_id)])
            .await
            .map_err(|f| classify(f, policy_id, target_id))?;
        Ok(())
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError> {
        self.call("detach-policy", &[("policy-id", policy_id), ("target-id", target_id)])
            .await
            .map_err(|f| classify(f, policy_id, target_id))?;
        Ok(())
    }
}
