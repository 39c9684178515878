use std::sync::Arc;

use orgpol_policy::{resolve_policy_content, BlobStore, ContentError, PolicyDocument};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::model::{policy_name, LifecycleAction, LifecycleRequest, Outcome, ResponseData};
use crate::pacing::Pacing;
use crate::service::{OrgError, OrganizationsApi, PolicySummary};

pub const CREATED_MESSAGE: &str = "Policies created and attached successfully";
pub const MODIFIED_MESSAGE: &str = "Policies modified and attached successfully";
pub const DELETED_MESSAGE: &str = "Policy(s) deleted successfully";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("listing {policy_type} policies failed: {source}")]
    ListPolicies { policy_type: String, source: OrgError },
    #[error("listing targets of {policy_id} failed: {source}")]
    ListTargets { policy_id: String, source: OrgError },
    #[error("creating policy {name} failed: {source}")]
    PolicyCreationFailed { name: String, source: OrgError },
    #[error("detaching {policy_id} from {target_id} failed: {source}")]
    Detach { policy_id: String, target_id: String, source: OrgError },
}

/// Drives one lifecycle request against the organizations service.
pub struct Reconciler {
    orgs: Arc<dyn OrganizationsApi>,
    blobs: Arc<dyn BlobStore>,
    pacing: Arc<dyn Pacing>,
}

impl Reconciler {
    pub fn new(
        orgs: Arc<dyn OrganizationsApi>,
        blobs: Arc<dyn BlobStore>,
        pacing: Arc<dyn Pacing>,
    ) -> Self {
        Self { orgs, blobs, pacing }
    }

    /// Never fails: any fault becomes a FAILED outcome carrying its message.
    #[instrument(skip_all, fields(action = %req.action, prefix = %req.policy_prefix, policy_type = %req.policy_type))]
    pub async fn reconcile(&self, req: &LifecycleRequest) -> Outcome {
        match self.run(req).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "reconcile failed");
                Outcome::failed(e.to_string())
            }
        }
    }

    async fn run(&self, req: &LifecycleRequest) -> Result<Outcome, ReconcileError> {
        let documents =
            resolve_policy_content(&req.content, &req.variables, self.blobs.as_ref()).await?;

        if req.action == LifecycleAction::Create {
            let ids = self.create_and_attach(req, &documents).await?;
            return Ok(Outcome::success(ResponseData {
                message: CREATED_MESSAGE.into(),
                policy_id_list: Some(ids),
                policy_prefix: Some(req.policy_prefix.clone()),
                policy_type: Some(req.policy_type.clone()),
                policy_targets: Some(req.policy_targets.clone()),
            }));
        }

        let matched = self.find_policies(&req.policy_type, &req.policy_prefix).await?;
        info!(count = matched.len(), "policies found for prefix");
        if matched.is_empty() {
            error!("no policy found for prefix");
            return Ok(Outcome::failed(format!(
                "Policy not found for prefix : {}",
                req.policy_prefix
            )));
        }

        for policy in &matched {
            self.retire_policy(policy).await?;
        }

        match req.action {
            LifecycleAction::Delete => Ok(Outcome::success(ResponseData {
                message: DELETED_MESSAGE.into(),
                ..Default::default()
            })),
            _ => {
                let ids = self.create_and_attach(req, &documents).await?;
                Ok(Outcome::success(ResponseData {
                    message: MODIFIED_MESSAGE.into(),
                    policy_id_list: Some(ids),
                    ..Default::default()
                }))
            }
        }
    }

    async fn find_policies(
        &self,
        policy_type: &str,
        prefix: &str,
    ) -> Result<Vec<PolicySummary>, ReconcileError> {
        let all = self.orgs.list_policies(policy_type).await.map_err(|source| {
            ReconcileError::ListPolicies { policy_type: policy_type.to_string(), source }
        })?;
        Ok(all.into_iter().filter(|p| p.name.starts_with(prefix)).collect())
    }

    /// Creates `<prefix>-00`, `<prefix>-01`, ... in document order, then attaches
    /// every new id to every target. A failed create aborts the whole run.
    async fn create_and_attach(
        &self,
        req: &LifecycleRequest,
        documents: &[PolicyDocument],
    ) -> Result<Vec<String>, ReconcileError> {
        let mut ids = Vec::with_capacity(documents.len());
        for (index, doc) in documents.iter().enumerate() {
            let name = policy_name(&req.policy_prefix, index);
            let content = doc.to_content_string();
            info!(%name, %content, "creating policy");
            let created = self
                .orgs
                .create_policy(&content, &req.policy_description, &name, &req.policy_type)
                .await
                .map_err(|source| ReconcileError::PolicyCreationFailed { name: name.clone(), source })?;
            info!(%name, id = %created.id, "policy created");
            ids.push(created.id);
        }
        info!(?ids, "policy creation complete");
        self.attach_all(&ids, &req.policy_targets).await;
        Ok(ids)
    }

    /// Attaches each id to each target. Failures are logged and skipped.
    async fn attach_all(&self, policy_ids: &[String], targets: &[String]) {
        for policy_id in policy_ids {
            for target in targets {
                self.pacing.before_attach().await;
                match self.orgs.attach_policy(policy_id, target).await {
                    Ok(()) => info!(%policy_id, %target, "attached"),
                    Err(e) => error!(%policy_id, %target, error = %e, "attach failed"),
                }
            }
        }
    }

    /// Detaches a policy from all of its current targets, then deletes it.
    /// A failed delete is logged and does not stop the caller.
    async fn retire_policy(&self, policy: &PolicySummary) -> Result<(), ReconcileError> {
        let policy_id = policy.id.as_str();
        let targets = self.orgs.list_targets_for_policy(policy_id).await.map_err(|source| {
            ReconcileError::ListTargets { policy_id: policy_id.to_string(), source }
        })?;
        for target in &targets {
            self.detach_with_retry(policy_id, &target.target_id).await?;
        }
        match self.orgs.delete_policy(policy_id).await {
            Ok(()) => info!(%policy_id, name = %policy.name, "policy deleted"),
            Err(e) => error!(%policy_id, name = %policy.name, error = %e, "delete failed, continuing"),
        }
        Ok(())
    }

    /// "Not attached" counts as done. "In use" is retried once after the pacing delay.
    pub(crate) async fn detach_with_retry(
        &self,
        policy_id: &str,
        target_id: &str,
    ) -> Result<(), ReconcileError> {
        let result = match self.detach_once(policy_id, target_id).await {
            Err(OrgError::PolicyInUse { .. }) => {
                warn!(%policy_id, %target_id, "policy in use, retrying detach once");
                self.pacing.before_detach_retry().await;
                self.detach_once(policy_id, target_id).await
            }
            other => other,
        };
        result.map_err(|source| ReconcileError::Detach {
            policy_id: policy_id.to_string(),
            target_id: target_id.to_string(),
            source,
        })
    }

    async fn detach_once(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError> {
        info!(%policy_id, %target_id, "detaching");
        match self.orgs.detach_policy(policy_id, target_id).await {
            Ok(()) => {
                info!(%policy_id, %target_id, "detached");
                Ok(())
            }
            Err(OrgError::PolicyNotAttached { .. }) => {
                info!(%policy_id, %target_id, "not attached, continuing with further detachments");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::NoPacing;
    use crate::service::PolicyTarget;
    use crate::Status;
    use async_trait::async_trait;
    use orgpol_policy::{ContentSource, Substitution};
    use serde_json::json;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        List(String),
        Targets(String),
        Create { name: String, content: String, description: String, policy_type: String },
        Delete(String),
        Attach(String, String),
        Detach(String, String),
    }

    impl Call {
        fn is_mutation(&self) -> bool {
            !matches!(self, Call::List(_) | Call::Targets(_))
        }
    }

    #[derive(Default)]
    struct FakeOrgs {
        existing: Vec<PolicySummary>,
        targets: HashMap<String, Vec<String>>,
        failing_deletes: HashSet<String>,
        failing_creates: HashSet<String>,
        failing_attaches: HashSet<(String, String)>,
        detach_script: Mutex<HashMap<(String, String), VecDeque<OrgError>>>,
        calls: Mutex<Vec<Call>>,
        next_id: AtomicUsize,
    }

    impl FakeOrgs {
        fn with_policies(names: &[(&str, &str)]) -> Self {
            Self {
                existing: names
                    .iter()
                    .map(|(id, name)| PolicySummary {
                        id: id.to_string(),
                        arn: None,
                        name: name.to_string(),
                        description: None,
                        policy_type: Some("SERVICE_CONTROL_POLICY".into()),
                        aws_managed: false,
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn script_detach(&self, policy: &str, target: &str, errors: Vec<OrgError>) {
            self.detach_script
                .lock()
                .unwrap()
                .insert((policy.into(), target.into()), errors.into());
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn service_error() -> OrgError {
        OrgError::Service { code: "AccessDeniedException".into(), message: "denied".into() }
    }

    fn in_use(policy: &str) -> OrgError {
        OrgError::PolicyInUse { policy_id: policy.into(), message: "in use".into() }
    }

    #[async_trait]
    impl OrganizationsApi for FakeOrgs {
        async fn list_policies(&self, policy_type: &str) -> Result<Vec<PolicySummary>, OrgError> {
            self.record(Call::List(policy_type.into()));
            Ok(self.existing.clone())
        }

        async fn list_targets_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyTarget>, OrgError> {
            self.record(Call::Targets(policy_id.into()));
            Ok(self
                .targets
                .get(policy_id)
                .into_iter()
                .flatten()
                .map(|t| PolicyTarget { target_id: t.clone(), arn: None, name: None, target_type: None })
                .collect())
        }

        async fn create_policy(
            &self,
            content: &str,
            description: &str,
            name: &str,
            policy_type: &str,
        ) -> Result<PolicySummary, OrgError> {
            self.record(Call::Create {
                name: name.into(),
                content: content.into(),
                description: description.into(),
                policy_type: policy_type.into(),
            });
            if self.failing_creates.contains(name) {
                return Err(OrgError::Service {
                    code: "DuplicatePolicyException".into(),
                    message: format!("{name} exists"),
                });
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(PolicySummary {
                id: format!("p-new{n}"),
                arn: None,
                name: name.into(),
                description: Some(description.into()),
                policy_type: Some(policy_type.into()),
                aws_managed: false,
            })
        }

        async fn delete_policy(&self, policy_id: &str) -> Result<(), OrgError> {
            self.record(Call::Delete(policy_id.into()));
            if self.failing_deletes.contains(policy_id) {
                return Err(service_error());
            }
            Ok(())
        }

        async fn attach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError> {
            self.record(Call::Attach(policy_id.into(), target_id.into()));
            if self.failing_attaches.contains(&(policy_id.to_string(), target_id.to_string())) {
                return Err(OrgError::ConcurrentModification("busy".into()));
            }
            Ok(())
        }

        async fn detach_policy(&self, policy_id: &str, target_id: &str) -> Result<(), OrgError> {
            self.record(Call::Detach(policy_id.into(), target_id.into()));
            let mut script = self.detach_script.lock().unwrap();
            match script.get_mut(&(policy_id.to_string(), target_id.to_string())).and_then(VecDeque::pop_front) {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    struct NoBlobs;

    #[async_trait]
    impl BlobStore for NoBlobs {
        async fn fetch_text(&self, bucket: &str, key: &str) -> Result<String, ContentError> {
            Err(ContentError::ContentUnavailable(format!("s3://{bucket}/{key}")))
        }
    }

    #[derive(Default)]
    struct CountingPacing {
        attaches: AtomicUsize,
        retries: AtomicUsize,
    }

    #[async_trait]
    impl Pacing for CountingPacing {
        async fn before_attach(&self) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }
        async fn before_detach_retry(&self) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request(action: LifecycleAction, prefix: &str, contents: &str, targets: &[&str]) -> LifecycleRequest {
        LifecycleRequest {
            action,
            policy_prefix: prefix.into(),
            policy_type: "SERVICE_CONTROL_POLICY".into(),
            policy_description: "guardrails".into(),
            content: ContentSource::Inline(json!(contents)),
            variables: vec![],
            policy_targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn reconciler(orgs: &Arc<FakeOrgs>, pacing: &Arc<CountingPacing>) -> Reconciler {
        Reconciler::new(orgs.clone(), Arc::new(NoBlobs), pacing.clone())
    }

    #[tokio::test]
    async fn create_names_policies_in_order_and_attaches_cross_product() {
        let orgs = Arc::new(FakeOrgs::default());
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Create, "guard", r#"[{"a":1},{"b":2}]"#, &["ou-1", "111122223333"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.data.message, CREATED_MESSAGE);
        assert_eq!(outcome.data.policy_id_list, Some(vec!["p-new0".to_string(), "p-new1".to_string()]));
        assert_eq!(outcome.data.policy_prefix.as_deref(), Some("guard"));
        assert_eq!(outcome.data.policy_type.as_deref(), Some("SERVICE_CONTROL_POLICY"));
        assert_eq!(outcome.data.policy_targets, Some(vec!["ou-1".to_string(), "111122223333".to_string()]));

        let calls = orgs.calls();
        let created: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Create { name, content, .. } => Some((name.as_str(), content.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(created, [("guard-00", r#"{"a":1}"#), ("guard-01", r#"{"b":2}"#)]);

        let attaches: HashSet<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Attach(p, t) => Some((p.clone(), t.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Attach(..))).count(), 4);
        for id in ["p-new0", "p-new1"] {
            for target in ["ou-1", "111122223333"] {
                assert!(attaches.contains(&(id.to_string(), target.to_string())));
            }
        }
        assert_eq!(pacing.attaches.load(Ordering::SeqCst), 4);
        assert!(!calls.iter().any(|c| matches!(c, Call::List(_))));
    }

    #[tokio::test]
    async fn create_passes_description_type_and_substituted_content() {
        let orgs = Arc::new(FakeOrgs::default());
        let pacing = Arc::new(CountingPacing::default());
        let mut req = request(LifecycleAction::Create, "scp", r#"[{"acct":"ACCT"}]"#, &[]);
        req.variables = vec![Substitution::new("ACCT", "X"), Substitution::new("X", "999")];

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert!(outcome.is_success());
        assert_eq!(
            orgs.calls(),
            vec![Call::Create {
                name: "scp-00".into(),
                content: r#"{"acct":"999"}"#.into(),
                description: "guardrails".into(),
                policy_type: "SERVICE_CONTROL_POLICY".into(),
            }]
        );
        assert_eq!(pacing.attaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_failure_aborts_before_any_attach() {
        let orgs = Arc::new(FakeOrgs {
            failing_creates: HashSet::from(["guard-01".to_string()]),
            ..Default::default()
        });
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Create, "guard", r#"[{"a":1},{"b":2},{"c":3}]"#, &["ou-1"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.data.message.contains("guard-01"), "{}", outcome.data.message);
        let calls = orgs.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Create { .. })).count(), 2);
        assert!(!calls.iter().any(|c| matches!(c, Call::Attach(..))));
    }

    #[tokio::test]
    async fn failed_attach_does_not_stop_remaining_attachments() {
        let orgs = Arc::new(FakeOrgs {
            failing_attaches: HashSet::from([("p-new0".to_string(), "ou-1".to_string())]),
            ..Default::default()
        });
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Create, "guard", r#"[{"a":1},{"b":2}]"#, &["ou-1", "ou-2"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert!(outcome.is_success());
        assert_eq!(orgs.calls().iter().filter(|c| matches!(c, Call::Attach(..))).count(), 4);
    }

    #[tokio::test]
    async fn delete_with_no_match_fails_without_mutation() {
        let orgs = Arc::new(FakeOrgs::with_policies(&[("p-1", "guard-00")]));
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Delete, "ghost", "[]", &["ou-1"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.data.message, "Policy not found for prefix : ghost");
        assert_eq!(orgs.calls(), vec![Call::List("SERVICE_CONTROL_POLICY".into())]);
    }

    #[tokio::test]
    async fn update_with_no_match_fails_without_mutation() {
        let orgs = Arc::new(FakeOrgs::default());
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Update, "ghost", r#"[{"a":1}]"#, &["ou-1"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.data.message, "Policy not found for prefix : ghost");
        assert!(!orgs.calls().iter().any(Call::is_mutation));
    }

    #[tokio::test]
    async fn delete_detaches_and_deletes_only_prefixed_policies() {
        let mut orgs = FakeOrgs::with_policies(&[
            ("p-1", "guard-00"),
            ("p-2", "other-00"),
            ("p-3", "guard-01"),
        ]);
        orgs.targets.insert("p-1".into(), vec!["ou-1".into(), "ou-2".into()]);
        orgs.targets.insert("p-3".into(), vec!["ou-1".into()]);
        let orgs = Arc::new(orgs);
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Delete, "guard", "[]", &[]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome, Outcome::success(ResponseData { message: DELETED_MESSAGE.into(), ..Default::default() }));
        assert_eq!(
            orgs.calls(),
            vec![
                Call::List("SERVICE_CONTROL_POLICY".into()),
                Call::Targets("p-1".into()),
                Call::Detach("p-1".into(), "ou-1".into()),
                Call::Detach("p-1".into(), "ou-2".into()),
                Call::Delete("p-1".into()),
                Call::Targets("p-3".into()),
                Call::Detach("p-3".into(), "ou-1".into()),
                Call::Delete("p-3".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_delete_is_skipped_and_update_still_recreates() {
        let mut orgs = FakeOrgs::with_policies(&[("p-1", "guard-00"), ("p-2", "guard-01")]);
        orgs.failing_deletes.insert("p-1".into());
        let orgs = Arc::new(orgs);
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Update, "guard", r#"[{"new":true}]"#, &["ou-9"]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.data.message, MODIFIED_MESSAGE);
        assert_eq!(outcome.data.policy_id_list, Some(vec!["p-new0".to_string()]));
        let calls = orgs.calls();
        assert!(calls.contains(&Call::Delete("p-1".into())));
        assert!(calls.contains(&Call::Delete("p-2".into())));
        assert!(calls.contains(&Call::Attach("p-new0".into(), "ou-9".into())));
        let last_delete = calls.iter().rposition(|c| matches!(c, Call::Delete(_))).unwrap();
        let first_create = calls.iter().position(|c| matches!(c, Call::Create { .. })).unwrap();
        assert!(last_delete < first_create);
    }

    #[tokio::test]
    async fn failed_delete_still_reports_delete_success() {
        let mut orgs = FakeOrgs::with_policies(&[("p-1", "guard-00"), ("p-2", "guard-01")]);
        orgs.failing_deletes.insert("p-1".into());
        let orgs = Arc::new(orgs);
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Delete, "guard", "[]", &[]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.data.message, DELETED_MESSAGE);
        assert!(orgs.calls().contains(&Call::Delete("p-2".into())));
    }

    #[tokio::test]
    async fn in_use_detach_is_retried_exactly_once() {
        let orgs = Arc::new(FakeOrgs::default());
        orgs.script_detach("p-1", "ou-1", vec![in_use("p-1")]);
        let pacing = Arc::new(CountingPacing::default());

        reconciler(&orgs, &pacing).detach_with_retry("p-1", "ou-1").await.unwrap();

        assert_eq!(orgs.calls().len(), 2);
        assert_eq!(pacing.retries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_in_use_fails_without_third_attempt() {
        let orgs = Arc::new(FakeOrgs::default());
        orgs.script_detach("p-1", "ou-1", vec![in_use("p-1"), in_use("p-1"), in_use("p-1")]);
        let pacing = Arc::new(CountingPacing::default());

        let err = reconciler(&orgs, &pacing).detach_with_retry("p-1", "ou-1").await.unwrap_err();

        assert!(matches!(err, ReconcileError::Detach { source: OrgError::PolicyInUse { .. }, .. }));
        assert_eq!(orgs.calls().len(), 2);
    }

    #[tokio::test]
    async fn other_detach_faults_are_not_retried() {
        let orgs = Arc::new(FakeOrgs::default());
        orgs.script_detach("p-1", "ou-1", vec![service_error()]);
        let pacing = Arc::new(CountingPacing::default());

        assert!(reconciler(&orgs, &pacing).detach_with_retry("p-1", "ou-1").await.is_err());
        assert_eq!(orgs.calls().len(), 1);
        assert_eq!(pacing.retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_attached_is_treated_as_detached() {
        let orgs = Arc::new(FakeOrgs::default());
        let not_attached = OrgError::PolicyNotAttached { policy_id: "p-1".into(), target_id: "ou-1".into() };
        orgs.script_detach("p-1", "ou-1", vec![not_attached.clone()]);
        orgs.script_detach("p-1", "ou-2", vec![in_use("p-1"), not_attached]);
        let pacing = Arc::new(CountingPacing::default());
        let r = reconciler(&orgs, &pacing);

        r.detach_with_retry("p-1", "ou-1").await.unwrap();
        r.detach_with_retry("p-1", "ou-2").await.unwrap();

        assert_eq!(orgs.calls().len(), 3);
    }

    #[tokio::test]
    async fn detach_fault_fails_the_branch() {
        let mut orgs = FakeOrgs::with_policies(&[("p-1", "guard-00")]);
        orgs.targets.insert("p-1".into(), vec!["ou-1".into()]);
        let orgs = Arc::new(orgs);
        orgs.script_detach("p-1", "ou-1", vec![service_error()]);
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Delete, "guard", "[]", &[]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.data.message.contains("AccessDeniedException"));
        assert!(!orgs.calls().contains(&Call::Delete("p-1".into())));
    }

    #[tokio::test]
    async fn content_failure_is_reported_without_remote_calls() {
        let orgs = Arc::new(FakeOrgs::default());
        let req = LifecycleRequest {
            content: ContentSource::S3 { bucket: "b".into(), key: "k".into() },
            ..request(LifecycleAction::Create, "guard", "", &["ou-1"])
        };

        let outcome = Reconciler::new(orgs.clone(), Arc::new(NoBlobs), Arc::new(NoPacing)).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.data.message.contains("s3://b/k"));
        assert!(orgs.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_content_is_reported() {
        let orgs = Arc::new(FakeOrgs::default());
        let pacing = Arc::new(CountingPacing::default());
        let req = request(LifecycleAction::Create, "guard", "not json", &[]);

        let outcome = reconciler(&orgs, &pacing).reconcile(&req).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.data.message.starts_with("malformed policy content"));
    }
}
