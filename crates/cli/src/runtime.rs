use anyhow::{Context, Result};
use orgpol_cfn::{handle_event, CustomResourceEvent, ResponseSender};
use orgpol_core::Reconciler;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};

const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Client for the Lambda custom-runtime API (`AWS_LAMBDA_RUNTIME_API`).
pub struct RuntimeClient {
    client: Client,
    base: String,
}

pub struct Invocation {
    pub request_id: String,
    pub body: Vec<u8>,
}

impl RuntimeClient {
    pub fn new(client: Client, api: &str) -> Self {
        Self { client, base: format!("http://{api}/2018-06-01/runtime") }
    }

    /// Long-polls for the next event.
    pub async fn next(&self) -> Result<Invocation> {
        let resp = self
            .client
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await
            .context("GET next invocation")?
            .error_for_status()
            .context("next invocation rejected")?;
        let request_id = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .context("invocation without request id")?
            .to_string();
        let body = resp.bytes().await.context("read invocation body")?.to_vec();
        Ok(Invocation { request_id, body })
    }

    pub async fn respond(&self, request_id: &str, body: &serde_json::Value) -> Result<()> {
        self.client
            .post(format!("{}/invocation/{request_id}/response", self.base))
            .json(body)
            .send()
            .await
            .context("POST invocation response")?
            .error_for_status()
            .context("invocation response rejected")?;
        Ok(())
    }

    pub async fn fail(&self, request_id: &str, error_type: &str, message: &str) -> Result<()> {
        self.client
            .post(format!("{}/invocation/{request_id}/error", self.base))
            .json(&json!({ "errorType": error_type, "errorMessage": message }))
            .send()
            .await
            .context("POST invocation error")?
            .error_for_status()
            .context("invocation error rejected")?;
        Ok(())
    }
}

/// Handles one invocation. Undecodable events go back to the runtime as errors
/// since there is no ResponseURL to report to.
pub async fn process_next(
    runtime: &RuntimeClient,
    reconciler: &Reconciler,
    sender: &dyn ResponseSender,
    log_stream: &str,
) -> Result<()> {
    let inv = runtime.next().await?;
    let span = info_span!("invocation", request_id = %inv.request_id);
    dispatch(runtime, &inv, reconciler, sender, log_stream).instrument(span).await
}

async fn dispatch(
    runtime: &RuntimeClient,
    inv: &Invocation,
    reconciler: &Reconciler,
    sender: &dyn ResponseSender,
    log_stream: &str,
) -> Result<()> {
    match serde_json::from_slice::<CustomResourceEvent>(&inv.body) {
        Ok(event) => {
            let response = handle_event(&event, reconciler, sender, log_stream).await;
            let body = serde_json::to_value(&response).context("encode response")?;
            runtime.respond(&inv.request_id, &body).await
        }
        Err(e) => {
            error!(error = %e, "undecodable event");
            runtime.fail(&inv.request_id, "InvalidEvent", &e.to_string()).await
        }
    }
}

pub async fn serve(
    runtime: &RuntimeClient,
    reconciler: &Reconciler,
    sender: &dyn ResponseSender,
    log_stream: &str,
) -> Result<()> {
    info!("runtime loop started");
    loop {
        if let Err(e) = process_next(runtime, reconciler, sender, log_stream).await {
            error!(error = %e, "invocation failed");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}
