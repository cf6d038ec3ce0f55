//! Test helpers for xfer-reconciler integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use xfer_reconciler::clients::memory::{InMemoryServerApi, SimSettings};
use xfer_reconciler::model::{
    Attachment, Domain, EndpointType, LifecycleState, Protocol, RemoteDescriptor, ServerConfig,
    ServerSpec, Tag,
};
use xfer_reconciler::{ReconcilerConfig, ReconciliationContext, ServerReconciler, StepResult};

/// Upper bound on invocations before a test gives up.
pub const MAX_INVOCATIONS: usize = 50;

pub fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        test_mode: true,
        ..Default::default()
    }
}

/// A reconciler sharing `api` with the test.
pub fn reconciler(api: &Arc<InMemoryServerApi>, config: ReconcilerConfig) -> ServerReconciler {
    ServerReconciler::new(api.clone(), config)
}

pub fn api(settings: SimSettings) -> Arc<InMemoryServerApi> {
    Arc::new(InMemoryServerApi::with_settings(settings))
}

pub fn make_public_spec() -> ServerSpec {
    ServerSpec {
        config: ServerConfig {
            protocols: BTreeSet::from([Protocol::Sftp]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn make_vpc_spec(subnets: &[&str], allocations: &[&str], groups: &[&str]) -> ServerSpec {
    let mut spec = make_public_spec();
    spec.config.endpoint_type = EndpointType::Vpc;
    spec.attachment = Attachment {
        vpc_id: Some("vpc-1".into()),
        vpc_endpoint_id: None,
        subnet_ids: set(subnets),
        security_group_ids: set(groups),
        address_allocation_ids: set(allocations),
    };
    spec
}

pub fn with_tags(mut spec: ServerSpec, tags: &[(&str, &str)]) -> ServerSpec {
    spec.tags = tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect();
    spec
}

/// Seed `spec` as an existing server in `state` and return the spec with its
/// assigned identity filled in.
pub async fn seed(
    api: &InMemoryServerApi,
    server_id: &str,
    state: LifecycleState,
    spec: &ServerSpec,
) -> ServerSpec {
    let mut attachment = spec.attachment.clone();
    if spec.is_vpc() {
        attachment.vpc_endpoint_id = Some(format!("vpce-{server_id}"));
    }
    let descriptor = RemoteDescriptor {
        server_id: server_id.to_string(),
        arn: format!("arn:xfer:server/{server_id}"),
        state,
        domain: Domain::S3,
        config: spec.config.clone(),
        attachment,
        tags: spec.tag_map(),
    };
    api.insert_server(descriptor.clone()).await;
    descriptor.to_spec()
}

/// Outcome of driving a flow to a terminal result.
pub struct Driven<T> {
    pub result: StepResult<T>,
    /// Every non-terminal result, in order.
    pub steps: Vec<StepResult<T>>,
}

impl<T> Driven<T> {
    pub fn invocations(&self) -> usize {
        self.steps.len() + 1
    }
}

/// Re-invoke `step` until it stops returning `InProgress`. The context is
/// round-tripped through JSON between invocations, as a caller persisting it
/// would.
pub async fn drive<T, F, Fut>(mut step: F) -> Driven<T>
where
    F: FnMut(Option<ReconciliationContext>) -> Fut,
    Fut: std::future::Future<Output = StepResult<T>>,
{
    let mut context = None;
    let mut steps = Vec::new();
    for _ in 0..MAX_INVOCATIONS {
        let result = step(context.take()).await;
        match &result {
            StepResult::InProgress { context: next, .. } => {
                let json = serde_json::to_string(next).expect("serialize context");
                context = Some(serde_json::from_str(&json).expect("deserialize context"));
                steps.push(result);
            }
            _ => return Driven { result, steps },
        }
    }
    panic!("flow did not finish within {MAX_INVOCATIONS} invocations");
}
