use crate::inventory::error::LoadError;
use crate::inventory::graph::GroupGraph;
use crate::types::inventory::{ParsedInventory, ALL_GROUP};

pub trait InventoryValidator {
    fn validate(&self, inventory: &ParsedInventory) -> Result<(), LoadError>;
}

pub struct GroupReferenceValidator;
pub struct GroupCycleValidator;
pub struct ConnectionValidator;

impl InventoryValidator for GroupReferenceValidator {
    fn validate(&self, inventory: &ParsedInventory) -> Result<(), LoadError> {
        for (host_name, host) in &inventory.hosts {
            for group_name in &host.direct_groups {
                if group_name != ALL_GROUP && !inventory.groups.contains_key(group_name) {
                    return Err(LoadError::UnknownGroupReference {
                        referrer: format!("host '{host_name}'"),
                        group: group_name.clone(),
                    });
                }
            }
        }

        for (group_name, group) in &inventory.groups {
            for child in &group.children {
                if child == ALL_GROUP {
                    return Err(LoadError::InvalidGroup {
                        group: group_name.clone(),
                        reason: format!("'{ALL_GROUP}' cannot be nested"),
                    });
                }
                if !inventory.groups.contains_key(child) {
                    return Err(LoadError::UnknownGroupReference {
                        referrer: format!("group '{group_name}'"),
                        group: child.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl InventoryValidator for GroupCycleValidator {
    fn validate(&self, inventory: &ParsedInventory) -> Result<(), LoadError> {
        GroupGraph::build(&inventory.groups)?.ensure_acyclic()
    }
}

impl InventoryValidator for ConnectionValidator {
    fn validate(&self, inventory: &ParsedInventory) -> Result<(), LoadError> {
        for (host_name, host) in &inventory.hosts {
            if host_name.is_empty() || host_name.chars().any(char::is_whitespace) {
                return Err(LoadError::InvalidHost {
                    host: host_name.clone(),
                    reason: "host names cannot be empty or contain whitespace".to_string(),
                });
            }

            if let Some(address) = &host.definition.address {
                if address.trim().is_empty() {
                    return Err(LoadError::InvalidHost {
                        host: host_name.clone(),
                        reason: "address is empty".to_string(),
                    });
                }
            }

            if host.definition.port == Some(0) || inventory.defaults.port == Some(0) {
                return Err(LoadError::InvalidHost {
                    host: host_name.clone(),
                    reason: "port 0 is not connectable".to_string(),
                });
            }

            let user = host
                .definition
                .user
                .as_deref()
                .or(inventory.defaults.user.as_deref());
            if user.is_some_and(|u| u.trim().is_empty()) {
                return Err(LoadError::InvalidHost {
                    host: host_name.clone(),
                    reason: "control user is empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

pub struct InventoryValidatorSet {
    validators: Vec<Box<dyn InventoryValidator>>,
}

impl InventoryValidatorSet {
    pub fn new() -> Self {
        Self {
            validators: vec![
                Box::new(GroupReferenceValidator),
                Box::new(GroupCycleValidator),
                Box::new(ConnectionValidator),
            ],
        }
    }

    pub fn validate(&self, inventory: &ParsedInventory) -> Result<(), LoadError> {
        for validator in &self.validators {
            validator.validate(inventory)?;
        }
        Ok(())
    }
}

impl Default for InventoryValidatorSet {
    fn default() -> Self {
        Self::new()
    }
}
