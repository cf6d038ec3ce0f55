//! Lifecycle state machine.
//!
//! Given the desired spec and a freshly observed descriptor, decide whether
//! the server is ready, which single action to take next, or whether to keep
//! polling. Address reconfiguration only happens while OFFLINE; an ONLINE
//! server with pending address drift is stopped first.

use thiserror::Error;
use tracing::debug;

use crate::clients::{Operation, ServerApi};
use crate::error::RemoteError;
use crate::model::{LifecycleState, RemoteDescriptor, ServerSpec};
use crate::network::{plan_address_changes, NetworkAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    UpdateAttachment(NetworkAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    AddressesNotReady,
    EndpointUnavailable,
    Transitioning(LifecycleState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Done,
    Act(ServerAction),
    Wait(WaitReason),
}

impl Decision {
    pub fn is_done(&self) -> bool {
        matches!(self, Decision::Done)
    }

    pub fn next_action(&self) -> Option<&ServerAction> {
        match self {
            Decision::Act(action) => Some(action),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StabilizeError {
    /// The control plane reports a failed transition. Never retried.
    #[error("server reported {0}")]
    Failed(LifecycleState),

    #[error("{operation} failed: {source}")]
    Remote {
        operation: Operation,
        source: RemoteError,
    },
}

fn remote(operation: Operation) -> impl FnOnce(RemoteError) -> StabilizeError {
    move |source| StabilizeError::Remote { operation, source }
}

/// True when the desired VPC attachment still differs in subnets or allocations.
pub fn pending_address_change(desired: &ServerSpec, observed: &RemoteDescriptor) -> bool {
    desired.is_vpc() && !observed.attachment.addresses_match(&desired.attachment)
}

/// Decide the next step for `observed`. Issues at most one action.
pub async fn stabilize<A>(
    api: &A,
    desired: &ServerSpec,
    observed: &RemoteDescriptor,
) -> Result<Decision, StabilizeError>
where
    A: ServerApi + ?Sized,
{
    let state = observed.state;
    let decision = if state.is_failed() {
        return Err(StabilizeError::Failed(state));
    } else if state.is_transitioning() {
        Decision::Wait(WaitReason::Transitioning(state))
    } else if state == LifecycleState::Offline {
        offline(api, desired, observed).await?
    } else {
        online(api, desired, observed).await?
    };

    debug!(
        "Server {} is {}: {:?}",
        observed.server_id, observed.state, decision
    );
    Ok(decision)
}

async fn offline<A>(
    api: &A,
    desired: &ServerSpec,
    observed: &RemoteDescriptor,
) -> Result<Decision, StabilizeError>
where
    A: ServerApi + ?Sized,
{
    if !desired.is_vpc() {
        return Ok(Decision::Act(ServerAction::Start));
    }

    // Re-planned on every call; the first step is the only one issued.
    if let Some(action) = plan_address_changes(&observed.attachment, &desired.attachment)
        .into_iter()
        .next()
    {
        return Ok(Decision::Act(ServerAction::UpdateAttachment(action)));
    }

    let allocations = &desired.attachment.address_allocation_ids;
    if !allocations.is_empty() {
        let ready = api
            .addresses_ready(allocations)
            .await
            .map_err(remote(Operation::DescribeAddresses))?;
        if !ready {
            return Ok(Decision::Wait(WaitReason::AddressesNotReady));
        }
    }

    Ok(Decision::Act(ServerAction::Start))
}

async fn online<A>(
    api: &A,
    desired: &ServerSpec,
    observed: &RemoteDescriptor,
) -> Result<Decision, StabilizeError>
where
    A: ServerApi + ?Sized,
{
    if !desired.is_vpc() {
        return Ok(Decision::Done);
    }

    let available = match observed.attachment.vpc_endpoint_id.as_deref() {
        Some(endpoint_id) => api
            .is_endpoint_available(endpoint_id)
            .await
            .map_err(remote(Operation::DescribeEndpoint))?,
        None => false,
    };
    if !available {
        return Ok(Decision::Wait(WaitReason::EndpointUnavailable));
    }

    if pending_address_change(desired, observed) {
        return Ok(Decision::Act(ServerAction::Stop));
    }

    Ok(Decision::Done)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::clients::memory::{InMemoryServerApi, SimSettings};
    use crate::model::{Attachment, Domain, EndpointType, ServerConfig};

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn vpc_attachment(subnets: &[&str], allocations: &[&str]) -> Attachment {
        Attachment {
            vpc_id: Some("vpc-1".into()),
            vpc_endpoint_id: Some("vpce-1".into()),
            subnet_ids: set(subnets),
            security_group_ids: set(&["sg-1"]),
            address_allocation_ids: set(allocations),
        }
    }

    fn desired(attachment: Attachment) -> ServerSpec {
        ServerSpec {
            config: ServerConfig {
                endpoint_type: EndpointType::Vpc,
                ..Default::default()
            },
            attachment,
            ..Default::default()
        }
    }

    fn observed(state: LifecycleState, attachment: Attachment) -> RemoteDescriptor {
        RemoteDescriptor {
            server_id: "s-1".into(),
            arn: "arn:xfer:server/s-1".into(),
            state,
            domain: Domain::S3,
            config: ServerConfig {
                endpoint_type: EndpointType::Vpc,
                ..Default::default()
            },
            attachment,
            tags: BTreeMap::new(),
        }
    }

    fn ready_api() -> InMemoryServerApi {
        InMemoryServerApi::with_settings(SimSettings {
            endpoint_probes_until_available: 0,
            address_probes_until_ready: 0,
            ..Default::default()
        })
    }

    #[test]
    fn test_offline_with_matching_attachment_starts() {
        let api = ready_api();
        let a = vpc_attachment(&["subnet-1"], &["eip-1"]);
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(a.clone()),
            &observed(LifecycleState::Offline, a),
        ))
        .unwrap();
        assert_eq!(decision, Decision::Act(ServerAction::Start));
        assert!(!decision.is_done());
    }

    #[test]
    fn test_offline_with_attachment_drift_updates_first() {
        let api = ready_api();
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(vpc_attachment(&["subnet-1"], &["eip-1", "eip-2"])),
            &observed(LifecycleState::Offline, vpc_attachment(&["subnet-1"], &[])),
        ))
        .unwrap();
        assert_eq!(
            decision.next_action(),
            Some(&ServerAction::UpdateAttachment(
                NetworkAction::AssignAddressAllocations {
                    subnet_ids: set(&["subnet-1"]),
                    address_allocation_ids: set(&["eip-1", "eip-2"]),
                }
            ))
        );
    }

    #[test]
    fn test_offline_waits_for_addresses() {
        let api = InMemoryServerApi::with_settings(SimSettings {
            address_probes_until_ready: 1,
            ..Default::default()
        });
        let a = vpc_attachment(&["subnet-1"], &["eip-1"]);
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(a.clone()),
            &observed(LifecycleState::Offline, a),
        ))
        .unwrap();
        assert_eq!(decision, Decision::Wait(WaitReason::AddressesNotReady));
        assert!(decision.next_action().is_none());
    }

    #[test]
    fn test_online_waits_for_endpoint() {
        let api = InMemoryServerApi::with_settings(SimSettings {
            endpoint_probes_until_available: 3,
            ..Default::default()
        });
        let a = vpc_attachment(&["subnet-1"], &[]);
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(a.clone()),
            &observed(LifecycleState::Online, a),
        ))
        .unwrap();
        assert_eq!(decision, Decision::Wait(WaitReason::EndpointUnavailable));
        assert!(!decision.is_done());
    }

    #[test]
    fn test_online_with_pending_allocations_stops() {
        let api = ready_api();
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(vpc_attachment(&["subnet-1"], &["eip-1"])),
            &observed(LifecycleState::Online, vpc_attachment(&["subnet-1"], &[])),
        ))
        .unwrap();
        assert_eq!(decision, Decision::Act(ServerAction::Stop));
    }

    #[test]
    fn test_online_and_converged_is_done() {
        let api = ready_api();
        let a = vpc_attachment(&["subnet-1"], &["eip-1"]);
        let decision = tokio_test::block_on(stabilize(
            &api,
            &desired(a.clone()),
            &observed(LifecycleState::Online, a),
        ))
        .unwrap();
        assert!(decision.is_done());
    }

    #[test]
    fn test_public_server_ignores_attachment() {
        let api = ready_api();
        let spec = ServerSpec::default();
        let mut seen = observed(LifecycleState::Online, vpc_attachment(&["subnet-9"], &[]));
        seen.config.endpoint_type = EndpointType::Public;
        let decision = tokio_test::block_on(stabilize(&api, &spec, &seen)).unwrap();
        assert!(decision.is_done());
        assert!(tokio_test::block_on(api.calls()).is_empty());
    }

    #[test]
    fn test_transitioning_states_wait() {
        let api = ready_api();
        let a = vpc_attachment(&["subnet-1"], &[]);
        for state in [LifecycleState::Starting, LifecycleState::Stopping] {
            let decision = tokio_test::block_on(stabilize(
                &api,
                &desired(a.clone()),
                &observed(state, a.clone()),
            ))
            .unwrap();
            assert_eq!(decision, Decision::Wait(WaitReason::Transitioning(state)));
        }
    }

    #[test]
    fn test_failed_states_are_terminal_without_action() {
        let api = ready_api();
        let a = vpc_attachment(&["subnet-1"], &["eip-1"]);
        for state in [LifecycleState::StartFailed, LifecycleState::StopFailed] {
            // Even with drift pending, a failed server yields no action.
            let result = tokio_test::block_on(stabilize(
                &api,
                &desired(vpc_attachment(&["subnet-2"], &[])),
                &observed(state, a.clone()),
            ));
            assert!(matches!(result, Err(StabilizeError::Failed(s)) if s == state));
        }
        assert!(tokio_test::block_on(api.calls()).is_empty());
    }
}
