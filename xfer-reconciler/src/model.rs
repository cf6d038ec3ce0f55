//! Server resource model: desired spec, observed descriptor and lifecycle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// How the server endpoint is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    #[default]
    Public,
    Vpc,
}

/// File transfer protocols a server can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Sftp,
    Ftp,
    Ftps,
    As2,
}

/// Where user authentication is delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityProviderType {
    #[default]
    ServiceManaged,
    ApiGateway,
    AwsDirectoryService,
    AwsLambda,
}

/// Backing storage domain. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Domain {
    #[default]
    S3,
    Efs,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderDetails {
    pub url: Option<String>,
    pub invocation_role: Option<String>,
    pub directory_id: Option<String>,
    pub function: Option<String>,
}

/// Network attachment of a server endpoint.
///
/// Id collections are sets: the control plane does not preserve ordering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub vpc_id: Option<String>,
    pub vpc_endpoint_id: Option<String>,
    pub subnet_ids: BTreeSet<String>,
    pub security_group_ids: BTreeSet<String>,
    pub address_allocation_ids: BTreeSet<String>,
}

impl Attachment {
    /// True when subnets and address allocations are identical.
    pub fn addresses_match(&self, other: &Attachment) -> bool {
        self.subnet_ids == other.subnet_ids
            && self.address_allocation_ids == other.address_allocation_ids
    }

    pub fn is_empty(&self) -> bool {
        self.subnet_ids.is_empty()
            && self.security_group_ids.is_empty()
            && self.address_allocation_ids.is_empty()
    }
}

/// The mutable server configuration, sent as one update-config call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub endpoint_type: EndpointType,
    pub protocols: BTreeSet<Protocol>,
    pub identity_provider_type: IdentityProviderType,
    pub identity_provider: IdentityProviderDetails,
    pub certificate: Option<String>,
    pub logging_role: Option<String>,
    pub security_policy_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Desired configuration of a server resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSpec {
    /// Assigned by the control plane on creation.
    pub server_id: Option<String>,
    pub arn: Option<String>,
    pub domain: Domain,
    #[serde(flatten)]
    pub config: ServerConfig,
    pub attachment: Attachment,
    pub tags: Vec<Tag>,
}

impl ServerSpec {
    pub fn is_vpc(&self) -> bool {
        self.config.endpoint_type == EndpointType::Vpc
    }

    /// Resource tags as a map. Later duplicates win.
    pub fn tag_map(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect()
    }
}

/// Operational state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Offline,
    Starting,
    Online,
    Stopping,
    StartFailed,
    StopFailed,
}

impl LifecycleState {
    /// Failed transitions are never left once entered.
    pub fn is_failed(self) -> bool {
        matches!(self, LifecycleState::StartFailed | LifecycleState::StopFailed)
    }

    pub fn is_transitioning(self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Stopping)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Offline => "OFFLINE",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Online => "ONLINE",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::StartFailed => "START_FAILED",
            LifecycleState::StopFailed => "STOP_FAILED",
        };
        f.write_str(s)
    }
}

/// Observed state of a server, as returned by a describe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub server_id: String,
    pub arn: String,
    pub state: LifecycleState,
    pub domain: Domain,
    pub config: ServerConfig,
    pub attachment: Attachment,
    pub tags: BTreeMap<String, String>,
}

impl RemoteDescriptor {
    /// Map the observed server back into the desired-spec shape.
    pub fn to_spec(&self) -> ServerSpec {
        ServerSpec {
            server_id: Some(self.server_id.clone()),
            arn: Some(self.arn.clone()),
            domain: self.domain,
            config: self.config.clone(),
            attachment: self.attachment.clone(),
            tags: self
                .tags
                .iter()
                .map(|(k, v)| Tag::new(k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_addresses_match_ignores_order_and_security_groups() {
        let a = Attachment {
            subnet_ids: set(&["subnet-2", "subnet-1"]),
            address_allocation_ids: set(&["eipalloc-1"]),
            security_group_ids: set(&["sg-1"]),
            ..Default::default()
        };
        let b = Attachment {
            subnet_ids: set(&["subnet-1", "subnet-2"]),
            address_allocation_ids: set(&["eipalloc-1"]),
            ..Default::default()
        };
        assert!(a.addresses_match(&b));
    }

    #[test]
    fn test_spec_deserializes_flattened_config() {
        let json = r#"{
            "endpoint_type": "VPC",
            "protocols": ["SFTP", "FTPS"],
            "certificate": "arn:cert",
            "attachment": { "vpc_id": "vpc-1", "subnet_ids": ["subnet-1"] },
            "tags": [{ "key": "team", "value": "storage" }]
        }"#;
        let spec: ServerSpec = serde_json::from_str(json).unwrap();
        assert!(spec.is_vpc());
        assert_eq!(spec.config.protocols.len(), 2);
        assert_eq!(spec.domain, Domain::S3);
        assert_eq!(spec.tag_map().get("team").map(String::as_str), Some("storage"));
    }

    #[test]
    fn test_failed_states() {
        assert!(LifecycleState::StartFailed.is_failed());
        assert!(LifecycleState::StopFailed.is_failed());
        assert!(!LifecycleState::Online.is_failed());
        assert!(LifecycleState::Stopping.is_transitioning());
        assert_eq!(LifecycleState::StartFailed.to_string(), "START_FAILED");
    }
}
