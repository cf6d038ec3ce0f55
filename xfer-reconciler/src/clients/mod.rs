//! Clients for the transfer server control plane.
//!
//! The reconciler only talks to the control plane through [`ServerApi`].
//! `memory` provides an in-process control plane used by the simulator and
//! the tests.

pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::model::{Attachment, Domain, RemoteDescriptor, ServerConfig};

pub use memory::InMemoryServerApi;

/// Remote operations, used to label log lines and failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DescribeServer,
    CreateServer,
    UpdateServer,
    StartServer,
    StopServer,
    UpdateAttachment,
    ModifyEndpointSecurityGroups,
    TagResource,
    UntagResource,
    DeleteServer,
    DescribeEndpoint,
    DescribeAddresses,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub domain: Domain,
    pub config: ServerConfig,
    /// Address allocations are never part of a create request.
    pub attachment: Attachment,
    pub tags: BTreeMap<String, String>,
}

/// Configuration pushed by an update-config call. Network addresses and
/// security groups are reconciled separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub config: ServerConfig,
    pub vpc_id: Option<String>,
}

/// Partial attachment change. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttachmentPatch {
    pub subnet_ids: Option<BTreeSet<String>>,
    pub address_allocation_ids: Option<BTreeSet<String>>,
}

/// Control plane operations consumed by the reconciler.
///
/// Calls are expected to be idempotent: re-issuing a call after a lost
/// response converges to the same remote state.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn describe(&self, server_id: &str) -> Result<RemoteDescriptor, RemoteError>;

    /// Returns the assigned server id.
    async fn create(&self, request: &CreateServerRequest) -> Result<String, RemoteError>;

    async fn update_config(&self, server_id: &str, update: &ConfigUpdate)
        -> Result<(), RemoteError>;

    async fn start(&self, server_id: &str) -> Result<(), RemoteError>;

    async fn stop(&self, server_id: &str) -> Result<(), RemoteError>;

    async fn update_attachment(
        &self,
        server_id: &str,
        patch: &AttachmentPatch,
    ) -> Result<(), RemoteError>;

    async fn modify_endpoint_security_groups(
        &self,
        endpoint_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), RemoteError>;

    async fn tag(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<(), RemoteError>;

    async fn untag(&self, arn: &str, keys: &BTreeSet<String>) -> Result<(), RemoteError>;

    async fn delete(&self, server_id: &str) -> Result<(), RemoteError>;

    async fn is_endpoint_available(&self, endpoint_id: &str) -> Result<bool, RemoteError>;

    /// True once every allocation reports a private address.
    async fn addresses_ready(
        &self,
        address_allocation_ids: &BTreeSet<String>,
    ) -> Result<bool, RemoteError>;
}
