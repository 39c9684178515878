use orgpol_core::{LifecycleAction, LifecycleRequest};
use orgpol_policy::{parse_variables, ContentError, ContentSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use thiserror::Error;

/// Echoed when the request carries no `PhysicalResourceId` (i.e. on Create).
pub const DEFAULT_PHYSICAL_RESOURCE_ID: &str = "OrgPolicyCustomResourceManager";

/// Inbound custom-resource request as delivered by CloudFormation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_properties: JsonMap<String, Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<JsonMap<String, Json>>,
}

#[derive(Error, Debug)]
pub enum PropertyError {
    #[error("missing required property {0}")]
    Missing(&'static str),
    #[error("property {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error(transparent)]
    Content(#[from] ContentError),
}

impl CustomResourceEvent {
    pub fn physical_resource_id(&self) -> &str {
        self.physical_resource_id.as_deref().unwrap_or(DEFAULT_PHYSICAL_RESOURCE_ID)
    }

    /// Builds the request from `ResourceProperties`.
    pub fn lifecycle_request(&self, action: LifecycleAction) -> Result<LifecycleRequest, PropertyError> {
        let props = &self.resource_properties;
        let variables = match props.get("Variables") {
            Some(v) => parse_variables(v)?,
            None => Vec::new(),
        };
        Ok(LifecycleRequest {
            action,
            policy_prefix: required_str(props, "PolicyPrefix")?,
            policy_type: required_str(props, "PolicyType")?,
            policy_description: required_str(props, "PolicyDescription")?,
            content: ContentSource::from_properties(props)?,
            variables,
            policy_targets: targets(props)?,
        })
    }
}

fn required_str(props: &JsonMap<String, Json>, name: &'static str) -> Result<String, PropertyError> {
    match props.get(name) {
        Some(Json::String(s)) => Ok(s.clone()),
        Some(other) => Err(PropertyError::Invalid { name, reason: format!("expected a string, got {other}") }),
        None => Err(PropertyError::Missing(name)),
    }
}

fn targets(props: &JsonMap<String, Json>) -> Result<Vec<String>, PropertyError> {
    let Some(value) = props.get("PolicyTargets") else {
        return Ok(Vec::new());
    };
    let invalid = |reason: String| PropertyError::Invalid { name: "PolicyTargets", reason };
    value
        .as_array()
        .ok_or_else(|| invalid("expected a list of target ids".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("target {t} is not a string")))
        })
        .collect()
}
