//! In-process control plane.
//!
//! Models the lifecycle rules the reconciler relies on: start and stop pass
//! through a transitional state for a number of describe calls, address
//! changes are rejected unless the server is OFFLINE, subnets and address
//! allocations cannot change in one request, and endpoints and addresses
//! need a number of probes before reporting ready. Faults can be injected per
//! operation and every call is journaled.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{AttachmentPatch, ConfigUpdate, CreateServerRequest, Operation, ServerApi};
use crate::error::RemoteError;
use crate::model::{EndpointType, LifecycleState, RemoteDescriptor};

#[derive(Debug, Clone)]
pub struct SimSettings {
    /// State a newly created server lands in.
    pub created_state: LifecycleState,
    /// State a start settles into.
    pub start_outcome: LifecycleState,
    /// State a stop settles into.
    pub stop_outcome: LifecycleState,
    /// Describe calls that still report STARTING/STOPPING.
    pub transition_reads: u32,
    /// Probes reporting a new endpoint as unavailable.
    pub endpoint_probes_until_available: u32,
    /// Probes reporting newly assigned addresses as not ready.
    pub address_probes_until_ready: u32,
    /// Describe calls that still find a deleted server.
    pub deletion_reads: u32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            created_state: LifecycleState::Offline,
            start_outcome: LifecycleState::Online,
            stop_outcome: LifecycleState::Offline,
            transition_reads: 1,
            endpoint_probes_until_available: 1,
            address_probes_until_ready: 1,
            deletion_reads: 1,
        }
    }
}

/// A journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String),
    Create(CreateServerRequest),
    UpdateConfig(String, ConfigUpdate),
    Start(String),
    Stop(String),
    UpdateAttachment(String, AttachmentPatch),
    ModifySecurityGroups {
        endpoint_id: String,
        add: BTreeSet<String>,
        remove: BTreeSet<String>,
    },
    Tag(String, BTreeMap<String, String>),
    Untag(String, BTreeSet<String>),
    Delete(String),
    EndpointProbe(String),
    AddressProbe(BTreeSet<String>),
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::Describe(_) => Operation::DescribeServer,
            Call::Create(_) => Operation::CreateServer,
            Call::UpdateConfig(..) => Operation::UpdateServer,
            Call::Start(_) => Operation::StartServer,
            Call::Stop(_) => Operation::StopServer,
            Call::UpdateAttachment(..) => Operation::UpdateAttachment,
            Call::ModifySecurityGroups { .. } => Operation::ModifyEndpointSecurityGroups,
            Call::Tag(..) => Operation::TagResource,
            Call::Untag(..) => Operation::UntagResource,
            Call::Delete(_) => Operation::DeleteServer,
            Call::EndpointProbe(_) => Operation::DescribeEndpoint,
            Call::AddressProbe(_) => Operation::DescribeAddresses,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::Describe(_) | Call::EndpointProbe(_) | Call::AddressProbe(_)
        )
    }
}

struct SimServer {
    descriptor: RemoteDescriptor,
    /// Target state and describe calls left before reaching it.
    settling: Option<(LifecycleState, u32)>,
    /// Describe calls left before the server disappears.
    deleting: Option<u32>,
}

#[derive(Default)]
struct ControlPlane {
    servers: BTreeMap<String, SimServer>,
    endpoint_probes: BTreeMap<String, u32>,
    address_probes: BTreeMap<String, u32>,
    faults: Vec<(Operation, RemoteError)>,
    calls: Vec<Call>,
}

impl ControlPlane {
    fn record(&mut self, call: Call) -> Result<(), RemoteError> {
        let operation = call.operation();
        self.calls.push(call);
        match self.faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(self.faults.remove(index).1),
            None => Ok(()),
        }
    }

    fn server_mut(&mut self, server_id: &str) -> Result<&mut SimServer, RemoteError> {
        self.servers
            .get_mut(server_id)
            .filter(|s| s.deleting.is_none())
            .ok_or_else(|| RemoteError::NotFound(format!("server {server_id} does not exist")))
    }

    fn server_by_arn(&mut self, arn: &str) -> Result<&mut SimServer, RemoteError> {
        self.servers
            .values_mut()
            .find(|s| s.descriptor.arn == arn && s.deleting.is_none())
            .ok_or_else(|| RemoteError::NotFound(format!("resource {arn} does not exist")))
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..17].to_string()
}

/// In-memory [`ServerApi`].
pub struct InMemoryServerApi {
    settings: SimSettings,
    plane: Mutex<ControlPlane>,
}

impl Default for InMemoryServerApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServerApi {
    pub fn new() -> Self {
        Self::with_settings(SimSettings::default())
    }

    pub fn with_settings(settings: SimSettings) -> Self {
        Self {
            settings,
            plane: Mutex::new(ControlPlane::default()),
        }
    }

    /// Seed an existing server.
    pub async fn insert_server(&self, descriptor: RemoteDescriptor) {
        let mut plane = self.plane.lock().await;
        plane.servers.insert(
            descriptor.server_id.clone(),
            SimServer {
                descriptor,
                settling: None,
                deleting: None,
            },
        );
    }

    /// Fail the next call of `operation` with `error`. Faults queue up.
    pub async fn inject(&self, operation: Operation, error: RemoteError) {
        self.plane.lock().await.faults.push((operation, error));
    }

    /// Current server state without journaling or advancing transitions.
    pub async fn peek(&self, server_id: &str) -> Option<RemoteDescriptor> {
        let plane = self.plane.lock().await;
        plane
            .servers
            .get(server_id)
            .filter(|s| s.deleting.is_none())
            .map(|s| s.descriptor.clone())
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.plane.lock().await.calls.clone()
    }
}

#[async_trait]
impl ServerApi for InMemoryServerApi {
    async fn describe(&self, server_id: &str) -> Result<RemoteDescriptor, RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Describe(server_id.to_string()))?;

        let not_found = || RemoteError::NotFound(format!("server {server_id} does not exist"));
        let server = plane.servers.get_mut(server_id).ok_or_else(not_found)?;

        if let Some(reads) = server.deleting {
            if reads == 0 {
                plane.servers.remove(server_id);
                return Err(not_found());
            }
            server.deleting = Some(reads - 1);
            return Ok(server.descriptor.clone());
        }

        if let Some((target, reads)) = server.settling {
            if reads == 0 {
                server.descriptor.state = target;
                server.settling = None;
            } else {
                server.settling = Some((target, reads - 1));
            }
        }

        Ok(server.descriptor.clone())
    }

    async fn create(&self, request: &CreateServerRequest) -> Result<String, RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Create(request.clone()))?;

        if !request.attachment.address_allocation_ids.is_empty() {
            return Err(RemoteError::InvalidRequest(
                "address allocations cannot be set on create".into(),
            ));
        }

        let server_id = format!("s-{}", short_id());
        let mut attachment = request.attachment.clone();
        if request.config.endpoint_type == EndpointType::Vpc {
            attachment.vpc_endpoint_id = Some(format!("vpce-{}", short_id()));
        }

        debug!("Simulated create of server {}", server_id);
        let descriptor = RemoteDescriptor {
            server_id: server_id.clone(),
            arn: format!("arn:xfer:server/{server_id}"),
            state: self.settings.created_state,
            domain: request.domain,
            config: request.config.clone(),
            attachment,
            tags: request.tags.clone(),
        };
        plane.servers.insert(
            server_id.clone(),
            SimServer {
                descriptor,
                settling: None,
                deleting: None,
            },
        );
        Ok(server_id)
    }

    async fn update_config(
        &self,
        server_id: &str,
        update: &ConfigUpdate,
    ) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::UpdateConfig(server_id.to_string(), update.clone()))?;

        let server = plane.server_mut(server_id)?;
        let descriptor = &mut server.descriptor;
        descriptor.config = update.config.clone();
        match update.config.endpoint_type {
            EndpointType::Public => descriptor.attachment = Default::default(),
            EndpointType::Vpc => {
                descriptor.attachment.vpc_id = update.vpc_id.clone();
                if descriptor.attachment.vpc_endpoint_id.is_none() {
                    descriptor.attachment.vpc_endpoint_id = Some(format!("vpce-{}", short_id()));
                }
            }
        }
        Ok(())
    }

    async fn start(&self, server_id: &str) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Start(server_id.to_string()))?;

        let settings = &self.settings;
        let server = plane.server_mut(server_id)?;
        match server.descriptor.state {
            LifecycleState::Offline => {
                server.descriptor.state = LifecycleState::Starting;
                server.settling = Some((settings.start_outcome, settings.transition_reads));
                Ok(())
            }
            LifecycleState::Online | LifecycleState::Starting => Ok(()),
            state => Err(RemoteError::Conflict(format!(
                "server {server_id} cannot be started while {state}"
            ))),
        }
    }

    async fn stop(&self, server_id: &str) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Stop(server_id.to_string()))?;

        let settings = &self.settings;
        let server = plane.server_mut(server_id)?;
        match server.descriptor.state {
            LifecycleState::Online => {
                server.descriptor.state = LifecycleState::Stopping;
                server.settling = Some((settings.stop_outcome, settings.transition_reads));
                Ok(())
            }
            LifecycleState::Offline | LifecycleState::Stopping => Ok(()),
            state => Err(RemoteError::Conflict(format!(
                "server {server_id} cannot be stopped while {state}"
            ))),
        }
    }

    async fn update_attachment(
        &self,
        server_id: &str,
        patch: &AttachmentPatch,
    ) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::UpdateAttachment(server_id.to_string(), patch.clone()))?;

        let probes = self.settings.address_probes_until_ready;
        let server = plane.server_mut(server_id)?;
        if server.descriptor.state != LifecycleState::Offline {
            return Err(RemoteError::InvalidRequest(format!(
                "server {server_id} must be OFFLINE to change its attachment, is {}",
                server.descriptor.state
            )));
        }

        let attachment = &mut server.descriptor.attachment;
        let subnets_change = patch
            .subnet_ids
            .as_ref()
            .is_some_and(|s| *s != attachment.subnet_ids);
        let allocations_change = patch
            .address_allocation_ids
            .as_ref()
            .is_some_and(|a| *a != attachment.address_allocation_ids);
        if subnets_change && allocations_change {
            return Err(RemoteError::InvalidRequest(
                "subnets and address allocations cannot change in one request".into(),
            ));
        }

        if let Some(subnets) = &patch.subnet_ids {
            attachment.subnet_ids = subnets.clone();
        }
        let mut assigned = Vec::new();
        if let Some(allocations) = &patch.address_allocation_ids {
            assigned = allocations
                .difference(&attachment.address_allocation_ids)
                .cloned()
                .collect();
            attachment.address_allocation_ids = allocations.clone();
        }
        for id in assigned {
            plane.address_probes.insert(id, probes);
        }
        Ok(())
    }

    async fn modify_endpoint_security_groups(
        &self,
        endpoint_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::ModifySecurityGroups {
            endpoint_id: endpoint_id.to_string(),
            add: add.clone(),
            remove: remove.clone(),
        })?;

        let server = plane
            .servers
            .values_mut()
            .find(|s| s.descriptor.attachment.vpc_endpoint_id.as_deref() == Some(endpoint_id))
            .ok_or_else(|| RemoteError::NotFound(format!("endpoint {endpoint_id} does not exist")))?;
        let groups = &mut server.descriptor.attachment.security_group_ids;
        groups.extend(add.iter().cloned());
        groups.retain(|g| !remove.contains(g));
        Ok(())
    }

    async fn tag(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Tag(arn.to_string(), tags.clone()))?;

        let server = plane.server_by_arn(arn)?;
        server
            .descriptor
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn untag(&self, arn: &str, keys: &BTreeSet<String>) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Untag(arn.to_string(), keys.clone()))?;

        let server = plane.server_by_arn(arn)?;
        server.descriptor.tags.retain(|k, _| !keys.contains(k));
        Ok(())
    }

    async fn delete(&self, server_id: &str) -> Result<(), RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::Delete(server_id.to_string()))?;

        let reads = self.settings.deletion_reads;
        match plane.servers.get_mut(server_id) {
            Some(server) => {
                if server.deleting.is_none() {
                    server.deleting = Some(reads);
                }
                Ok(())
            }
            None => Err(RemoteError::NotFound(format!(
                "server {server_id} does not exist"
            ))),
        }
    }

    async fn is_endpoint_available(&self, endpoint_id: &str) -> Result<bool, RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::EndpointProbe(endpoint_id.to_string()))?;

        // Endpoints seen for the first time are treated as just provisioned.
        let remaining = plane
            .endpoint_probes
            .entry(endpoint_id.to_string())
            .or_insert(self.settings.endpoint_probes_until_available);
        if *remaining == 0 {
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }

    async fn addresses_ready(
        &self,
        address_allocation_ids: &BTreeSet<String>,
    ) -> Result<bool, RemoteError> {
        let mut plane = self.plane.lock().await;
        plane.record(Call::AddressProbe(address_allocation_ids.clone()))?;

        let mut ready = true;
        for id in address_allocation_ids {
            let remaining = plane
                .address_probes
                .entry(id.clone())
                .or_insert(self.settings.address_probes_until_ready);
            if *remaining > 0 {
                *remaining -= 1;
                ready = false;
            }
        }
        Ok(ready)
    }
}
