use std::fmt;
use std::str::FromStr;

use orgpol_policy::{ContentSource, Substitution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected action '{}'", self.0)
    }
}

impl FromStr for LifecycleAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(LifecycleAction::Create),
            "Update" => Ok(LifecycleAction::Update),
            "Delete" => Ok(LifecycleAction::Delete),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleAction::Create => "Create",
            LifecycleAction::Update => "Update",
            LifecycleAction::Delete => "Delete",
        };
        f.write_str(s)
    }
}

/// One parsed custom-resource request. Built once per invocation.
#[derive(Debug, Clone)]
pub struct LifecycleRequest {
    pub action: LifecycleAction,
    pub policy_prefix: String,
    pub policy_type: String,
    pub policy_description: String,
    pub content: ContentSource,
    pub variables: Vec<Substitution>,
    pub policy_targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failed,
}

/// The `Data` block of the callback; `Message` doubles as the report reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseData {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: Status,
    pub data: ResponseData,
}

impl Outcome {
    pub fn success(data: ResponseData) -> Self {
        Self { status: Status::Success, data }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            data: ResponseData { message: message.into(), ..Default::default() },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// `<prefix>-NN`, index zero-padded to two digits.
pub fn policy_name(prefix: &str, index: usize) -> String {
    format!("{prefix}-{index:0>2}")
}
