//! Reconciles prefix-grouped organization policies against a lifecycle request.

pub mod model;
pub mod pacing;
pub mod reconcile;
pub mod service;

pub use model::{
    policy_name, LifecycleAction, LifecycleRequest, Outcome, ResponseData, Status, UnknownAction,
};
pub use pacing::{FixedPacing, NoPacing, Pacing};
pub use reconcile::{ReconcileError, Reconciler, CREATED_MESSAGE, DELETED_MESSAGE, MODIFIED_MESSAGE};
pub use service::{OrgError, OrganizationsApi, PolicySummary, PolicyTarget};
