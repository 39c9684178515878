use async_trait::async_trait;
use orgpol_core::{Outcome, ResponseData, Status};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::CustomResourceEvent;

/// Body PUT to the presigned `ResponseURL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnResponse {
    pub status: Status,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub no_echo: bool,
    pub data: ResponseData,
}

impl CfnResponse {
    pub fn new(event: &CustomResourceEvent, outcome: Outcome, log_stream: &str) -> Self {
        Self {
            status: outcome.status,
            reason: format!(
                "{}, See the details in CloudWatch Log Stream: {log_stream}",
                outcome.data.message
            ),
            physical_resource_id: event.physical_resource_id().to_string(),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data: outcome.data,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("encode response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("PUT response: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response URL returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait ResponseSender: Send + Sync {
    async fn send(&self, url: &str, response: &CfnResponse) -> Result<(), SendError>;
}

/// PUTs with an empty content type, which is what the presigned URL is signed for.
#[derive(Debug, Clone, Default)]
pub struct HttpResponseSender {
    client: Client,
}

impl HttpResponseSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResponseSender for HttpResponseSender {
    async fn send(&self, url: &str, response: &CfnResponse) -> Result<(), SendError> {
        let body = serde_json::to_vec(response)?;
        let resp = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, body.len().to_string())
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}
