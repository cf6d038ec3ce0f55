//! Network attachment planning.
//!
//! The control plane rejects a request that changes subnets and address
//! allocations together, so a subnet move is split into clear, move and
//! reassign steps. Security groups live on the VPC endpoint and are changed
//! independently of the server.

use std::collections::BTreeSet;

use crate::clients::AttachmentPatch;
use crate::model::{Attachment, EndpointType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAction {
    /// Applied to the VPC endpoint, not the server.
    ModifySecurityGroups {
        add: BTreeSet<String>,
        remove: BTreeSet<String>,
    },
    ClearAddressAllocations {
        subnet_ids: BTreeSet<String>,
    },
    UpdateSubnets {
        subnet_ids: BTreeSet<String>,
    },
    AssignAddressAllocations {
        subnet_ids: BTreeSet<String>,
        address_allocation_ids: BTreeSet<String>,
    },
}

impl NetworkAction {
    /// The server-side patch for an address action.
    pub fn attachment_patch(&self) -> Option<AttachmentPatch> {
        match self {
            NetworkAction::ModifySecurityGroups { .. } => None,
            NetworkAction::ClearAddressAllocations { subnet_ids } => Some(AttachmentPatch {
                subnet_ids: Some(subnet_ids.clone()),
                address_allocation_ids: Some(BTreeSet::new()),
            }),
            NetworkAction::UpdateSubnets { subnet_ids } => Some(AttachmentPatch {
                subnet_ids: Some(subnet_ids.clone()),
                address_allocation_ids: None,
            }),
            NetworkAction::AssignAddressAllocations {
                subnet_ids,
                address_allocation_ids,
            } => Some(AttachmentPatch {
                subnet_ids: Some(subnet_ids.clone()),
                address_allocation_ids: Some(address_allocation_ids.clone()),
            }),
        }
    }
}

/// Security group delta, or `None` when neither side is VPC or nothing changed.
pub fn plan_security_groups(
    old_type: EndpointType,
    old: &Attachment,
    new_type: EndpointType,
    new: &Attachment,
) -> Option<NetworkAction> {
    if old_type != EndpointType::Vpc && new_type != EndpointType::Vpc {
        return None;
    }

    let add: BTreeSet<String> = new
        .security_group_ids
        .difference(&old.security_group_ids)
        .cloned()
        .collect();
    let remove: BTreeSet<String> = old
        .security_group_ids
        .difference(&new.security_group_ids)
        .cloned()
        .collect();

    if add.is_empty() && remove.is_empty() {
        None
    } else {
        Some(NetworkAction::ModifySecurityGroups { add, remove })
    }
}

/// Ordered subnet and address allocation changes from `old` to `new`.
pub fn plan_address_changes(old: &Attachment, new: &Attachment) -> Vec<NetworkAction> {
    let mut actions = Vec::new();

    if old.subnet_ids != new.subnet_ids {
        if !old.address_allocation_ids.is_empty() {
            actions.push(NetworkAction::ClearAddressAllocations {
                subnet_ids: old.subnet_ids.clone(),
            });
        }
        actions.push(NetworkAction::UpdateSubnets {
            subnet_ids: new.subnet_ids.clone(),
        });
        if !new.address_allocation_ids.is_empty() {
            actions.push(NetworkAction::AssignAddressAllocations {
                subnet_ids: new.subnet_ids.clone(),
                address_allocation_ids: new.address_allocation_ids.clone(),
            });
        }
    } else if old.address_allocation_ids != new.address_allocation_ids {
        actions.push(NetworkAction::AssignAddressAllocations {
            subnet_ids: new.subnet_ids.clone(),
            address_allocation_ids: new.address_allocation_ids.clone(),
        });
    }

    actions
}

/// Every change needed to move the attachment from `old` to `new`.
///
/// The driver applies the two halves separately: address changes from the
/// OFFLINE branch of stabilization, security groups once the server is ready.
pub fn plan_network_changes(
    old_type: EndpointType,
    old: &Attachment,
    new_type: EndpointType,
    new: &Attachment,
) -> Vec<NetworkAction> {
    let mut actions: Vec<NetworkAction> =
        plan_security_groups(old_type, old, new_type, new).into_iter().collect();
    actions.extend(plan_address_changes(old, new));
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn attachment(subnets: &[&str], allocations: &[&str], sgs: &[&str]) -> Attachment {
        Attachment {
            vpc_id: Some("vpc-1".into()),
            vpc_endpoint_id: Some("vpce-1".into()),
            subnet_ids: set(subnets),
            security_group_ids: set(sgs),
            address_allocation_ids: set(allocations),
        }
    }

    #[test]
    fn test_identical_attachments_need_nothing() {
        let cases = [
            attachment(&[], &[], &[]),
            attachment(&["subnet-1"], &[], &["sg-1"]),
            attachment(&["subnet-1", "subnet-2"], &["eip-1", "eip-2"], &["sg-1", "sg-2"]),
        ];
        for a in &cases {
            assert!(plan_network_changes(EndpointType::Vpc, a, EndpointType::Vpc, a).is_empty());
        }
    }

    #[test]
    fn test_security_group_delta_is_one_action() {
        let old = attachment(&["subnet-1"], &[], &["sg-1", "sg-2"]);
        let new = attachment(&["subnet-1"], &[], &["sg-2", "sg-3"]);
        assert_eq!(
            plan_network_changes(EndpointType::Vpc, &old, EndpointType::Vpc, &new),
            vec![NetworkAction::ModifySecurityGroups {
                add: set(&["sg-3"]),
                remove: set(&["sg-1"]),
            }]
        );
    }

    #[test]
    fn test_security_groups_ignored_for_public_endpoints() {
        let old = attachment(&[], &[], &["sg-1"]);
        let new = attachment(&[], &[], &["sg-2"]);
        assert!(
            plan_security_groups(EndpointType::Public, &old, EndpointType::Public, &new).is_none()
        );
        assert!(
            plan_security_groups(EndpointType::Public, &old, EndpointType::Vpc, &new).is_some()
        );
    }

    #[test]
    fn test_allocation_only_change_is_single_assign() {
        let old = attachment(&["subnet-1"], &[], &[]);
        let new = attachment(&["subnet-1"], &["eip-1", "eip-2"], &[]);
        assert_eq!(
            plan_address_changes(&old, &new),
            vec![NetworkAction::AssignAddressAllocations {
                subnet_ids: set(&["subnet-1"]),
                address_allocation_ids: set(&["eip-1", "eip-2"]),
            }]
        );
    }

    #[test]
    fn test_subnet_move_clears_then_moves_then_reassigns() {
        let old = attachment(&["subnet-1"], &["eip-1"], &[]);
        let new = attachment(&["subnet-2"], &["eip-2"], &[]);
        assert_eq!(
            plan_address_changes(&old, &new),
            vec![
                NetworkAction::ClearAddressAllocations {
                    subnet_ids: set(&["subnet-1"]),
                },
                NetworkAction::UpdateSubnets {
                    subnet_ids: set(&["subnet-2"]),
                },
                NetworkAction::AssignAddressAllocations {
                    subnet_ids: set(&["subnet-2"]),
                    address_allocation_ids: set(&["eip-2"]),
                },
            ]
        );
    }

    #[test]
    fn test_subnet_move_without_allocations_is_single_update() {
        let old = attachment(&["subnet-1"], &[], &[]);
        let new = attachment(&["subnet-2"], &[], &[]);
        let plan = plan_address_changes(&old, &new);
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan[0].attachment_patch(),
            Some(AttachmentPatch {
                subnet_ids: Some(set(&["subnet-2"])),
                address_allocation_ids: None,
            })
        );
    }
}
