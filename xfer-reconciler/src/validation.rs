//! Validation of desired server specs before any remote call.

use thiserror::Error;

use crate::model::{EndpointType, IdentityProviderType, Protocol, ServerSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one protocol is required")]
    NoProtocols,

    #[error("VPC endpoints require a VPC id")]
    VpcIdRequired,

    #[error("VPC endpoints require at least one subnet")]
    SubnetRequired,

    #[error("Public endpoints cannot carry subnets, security groups or address allocations")]
    PublicWithAttachment,

    #[error("FTP requires a VPC endpoint")]
    FtpRequiresVpc,

    #[error("{0:?} requires an identity provider other than SERVICE_MANAGED")]
    ServiceManagedNotAllowed(Protocol),

    #[error("FTPS requires a certificate")]
    CertificateRequired,

    #[error("API_GATEWAY identity provider requires a URL and an invocation role")]
    ApiGatewayDetailsRequired,

    #[error("AWS_LAMBDA identity provider requires a function")]
    LambdaFunctionRequired,

    #[error("Storage domain cannot be changed after creation")]
    DomainChanged,
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Check a desired spec for combinations the control plane would reject.
pub fn validate(spec: &ServerSpec) -> Result<()> {
    let config = &spec.config;
    let attachment = &spec.attachment;

    if config.protocols.is_empty() {
        return Err(ValidationError::NoProtocols);
    }

    match config.endpoint_type {
        EndpointType::Vpc => {
            if attachment.vpc_id.as_deref().unwrap_or_default().is_empty() {
                return Err(ValidationError::VpcIdRequired);
            }
            if attachment.subnet_ids.is_empty() {
                return Err(ValidationError::SubnetRequired);
            }
        }
        EndpointType::Public => {
            if !attachment.is_empty() {
                return Err(ValidationError::PublicWithAttachment);
            }
        }
    }

    let service_managed = config.identity_provider_type == IdentityProviderType::ServiceManaged;
    if config.protocols.contains(&Protocol::Ftp) {
        if config.endpoint_type != EndpointType::Vpc {
            return Err(ValidationError::FtpRequiresVpc);
        }
        if service_managed {
            return Err(ValidationError::ServiceManagedNotAllowed(Protocol::Ftp));
        }
    }
    if config.protocols.contains(&Protocol::Ftps) {
        if config.certificate.is_none() {
            return Err(ValidationError::CertificateRequired);
        }
        if service_managed {
            return Err(ValidationError::ServiceManagedNotAllowed(Protocol::Ftps));
        }
    }

    let idp = &config.identity_provider;
    match config.identity_provider_type {
        IdentityProviderType::ApiGateway if idp.url.is_none() || idp.invocation_role.is_none() => {
            return Err(ValidationError::ApiGatewayDetailsRequired);
        }
        IdentityProviderType::AwsLambda if idp.function.is_none() => {
            return Err(ValidationError::LambdaFunctionRequired);
        }
        _ => {}
    }

    Ok(())
}

/// Checks that only apply when moving from `previous` to `desired`.
pub fn validate_update(previous: &ServerSpec, desired: &ServerSpec) -> Result<()> {
    validate(desired)?;
    if previous.domain != desired.domain {
        return Err(ValidationError::DomainChanged);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::{Attachment, Domain, ServerConfig};

    fn sftp_public() -> ServerSpec {
        ServerSpec {
            config: ServerConfig {
                protocols: BTreeSet::from([Protocol::Sftp]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sftp_vpc() -> ServerSpec {
        let mut spec = sftp_public();
        spec.config.endpoint_type = EndpointType::Vpc;
        spec.attachment = Attachment {
            vpc_id: Some("vpc-1".into()),
            subnet_ids: BTreeSet::from(["subnet-1".to_string()]),
            ..Default::default()
        };
        spec
    }

    #[test]
    fn test_valid_specs() {
        assert_eq!(validate(&sftp_public()), Ok(()));
        assert_eq!(validate(&sftp_vpc()), Ok(()));
    }

    #[test]
    fn test_protocols_required() {
        let mut spec = sftp_public();
        spec.config.protocols.clear();
        assert_eq!(validate(&spec), Err(ValidationError::NoProtocols));
    }

    #[test]
    fn test_vpc_requires_subnets() {
        let mut spec = sftp_vpc();
        spec.attachment.subnet_ids.clear();
        assert_eq!(validate(&spec), Err(ValidationError::SubnetRequired));
    }

    #[test]
    fn test_public_rejects_attachment() {
        let mut spec = sftp_public();
        spec.attachment.security_group_ids.insert("sg-1".into());
        assert_eq!(validate(&spec), Err(ValidationError::PublicWithAttachment));
    }

    #[test]
    fn test_ftp_rules() {
        let mut spec = sftp_public();
        spec.config.protocols.insert(Protocol::Ftp);
        assert_eq!(validate(&spec), Err(ValidationError::FtpRequiresVpc));

        let mut spec = sftp_vpc();
        spec.config.protocols.insert(Protocol::Ftp);
        assert_eq!(
            validate(&spec),
            Err(ValidationError::ServiceManagedNotAllowed(Protocol::Ftp))
        );

        spec.config.identity_provider_type = IdentityProviderType::AwsLambda;
        spec.config.identity_provider.function = Some("arn:fn".into());
        assert_eq!(validate(&spec), Ok(()));
    }

    #[test]
    fn test_ftps_requires_certificate() {
        let mut spec = sftp_public();
        spec.config.protocols.insert(Protocol::Ftps);
        spec.config.identity_provider_type = IdentityProviderType::ApiGateway;
        spec.config.identity_provider.url = Some("https://idp".into());
        spec.config.identity_provider.invocation_role = Some("arn:role".into());
        assert_eq!(validate(&spec), Err(ValidationError::CertificateRequired));

        spec.config.certificate = Some("arn:cert".into());
        assert_eq!(validate(&spec), Ok(()));
    }

    #[test]
    fn test_domain_is_create_only() {
        let previous = sftp_public();
        let mut desired = sftp_public();
        desired.domain = Domain::Efs;
        assert_eq!(
            validate_update(&previous, &desired),
            Err(ValidationError::DomainChanged)
        );
    }
}
