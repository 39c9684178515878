//! CloudFormation custom-resource protocol: inbound request, response envelope, callback.

use orgpol_core::{LifecycleAction, Outcome, Reconciler};
use tracing::{error, info};

mod event;
mod response;

pub use event::{CustomResourceEvent, PropertyError, DEFAULT_PHYSICAL_RESOURCE_ID};
pub use response::{CfnResponse, HttpResponseSender, ResponseSender, SendError};

pub const UNEXPECTED_EVENT_MESSAGE: &str = "Unexpected event received";

/// Runs one request to completion and sends exactly one response.
/// Delivery failures are logged, not retried.
pub async fn handle_event(
    event: &CustomResourceEvent,
    reconciler: &Reconciler,
    sender: &dyn ResponseSender,
    log_stream: &str,
) -> CfnResponse {
    info!(
        request_type = %event.request_type,
        stack_id = %event.stack_id,
        logical_resource_id = %event.logical_resource_id,
        properties = %serde_json::Value::Object(event.resource_properties.clone()),
        "custom resource request"
    );

    let outcome = match event.request_type.parse::<LifecycleAction>() {
        Err(e) => {
            error!(error = %e, "unexpected action");
            Outcome::failed(UNEXPECTED_EVENT_MESSAGE)
        }
        Ok(action) => match event.lifecycle_request(action) {
            Ok(req) => reconciler.reconcile(&req).await,
            Err(e) => {
                error!(error = %e, "invalid resource properties");
                Outcome::failed(e.to_string())
            }
        },
    };

    let response = CfnResponse::new(event, outcome, log_stream);
    match sender.send(&event.response_url, &response).await {
        Ok(()) => info!(status = ?response.status, "response sent"),
        Err(e) => error!(error = %e, url = %event.response_url, "sending response failed"),
    }
    response
}
