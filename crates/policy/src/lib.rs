use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use thiserror::Error;
use tracing::info;

/// One organization policy body, kept as an opaque JSON tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument(pub Json);

impl PolicyDocument {
    /// Compact JSON text sent as the policy content.
    pub fn to_content_string(&self) -> String {
        self.0.to_string()
    }
}

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("policy content unavailable: {0}")]
    ContentUnavailable(String),
    #[error("malformed policy content: {0}")]
    MalformedContent(String),
    #[error("invalid Variables: {0}")]
    InvalidVariables(String),
}

/// Where the policy text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    Inline(Json),
    S3 { bucket: String, key: String },
}

impl ContentSource {
    /// Inline `PolicyContents` wins over `PolicyBucket` + `PolicyLocation`.
    pub fn from_properties(props: &JsonMap<String, Json>) -> Result<Self, ContentError> {
        if let Some(inline) = props.get("PolicyContents") {
            return Ok(ContentSource::Inline(inline.clone()));
        }
        let bucket = props.get("PolicyBucket").and_then(Json::as_str);
        let key = props.get("PolicyLocation").and_then(Json::as_str);
        match (bucket, key) {
            (Some(b), Some(k)) if !b.is_empty() && !k.is_empty() => Ok(ContentSource::S3 {
                bucket: b.to_string(),
                key: k.to_string(),
            }),
            _ => Err(ContentError::ContentUnavailable(
                "neither PolicyContents nor PolicyBucket/PolicyLocation was provided".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub find: String,
    pub replace: String,
}

impl Substitution {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self { find: find.into(), replace: replace.into() }
    }
}

/// Parses `[ { "<find>": "<replace>", ... }, ... ]`, keeping the listed order.
pub fn parse_variables(value: &Json) -> Result<Vec<Substitution>, ContentError> {
    let items = value
        .as_array()
        .ok_or_else(|| ContentError::InvalidVariables("expected a list of objects".into()))?;
    let mut subs = Vec::new();
    for item in items {
        let map = item.as_object().ok_or_else(|| {
            ContentError::InvalidVariables(format!("expected an object, got {item}"))
        })?;
        for (find, replace) in map {
            if find.is_empty() {
                return Err(ContentError::InvalidVariables("variable name must not be empty".into()));
            }
            let replace = replace.as_str().ok_or_else(|| {
                ContentError::InvalidVariables(format!("value for '{find}' must be a string"))
            })?;
            subs.push(Substitution::new(find.clone(), replace));
        }
    }
    Ok(subs)
}

/// Replaces every literal occurrence of each `find`, one pass per pair, in order.
/// Later passes see the output of earlier ones.
pub fn apply_substitutions(text: &str, subs: &[Substitution]) -> String {
    let mut out = text.to_string();
    for s in subs {
        info!(find = %s.find, replace = %s.replace, "replacing variable");
        out = out.replace(&s.find, &s.replace);
    }
    out
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch_text(&self, bucket: &str, key: &str) -> Result<String, ContentError>;
}

pub async fn resolve_policy_content(
    source: &ContentSource,
    subs: &[Substitution],
    blobs: &dyn BlobStore,
) -> Result<Vec<PolicyDocument>, ContentError> {
    let raw = match source {
        ContentSource::Inline(Json::String(s)) => s.clone(),
        ContentSource::Inline(v) => v.to_string(),
        ContentSource::S3 { bucket, key } => {
            info!(%bucket, %key, "fetching policy content");
            blobs.fetch_text(bucket, key).await?
        }
    };
    let text = apply_substitutions(&raw, subs);
    parse_documents(&text)
}

pub fn parse_documents(text: &str) -> Result<Vec<PolicyDocument>, ContentError> {
    let parsed: Json =
        serde_json::from_str(text).map_err(|e| ContentError::MalformedContent(e.to_string()))?;
    match parsed {
        Json::Array(items) => Ok(items.into_iter().map(PolicyDocument).collect()),
        other => Err(ContentError::MalformedContent(format!(
            "expected a JSON array of policy documents, got {}",
            kind(&other)
        ))),
    }
}

fn kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
