//! Property directory: the external collaborator that knows which properties
//! exist and which account owns each of them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use propmarket_core::{AccountId, PropertyId};

pub trait PropertyDirectory: Send + Sync {
    fn property_exists(&self, property_id: PropertyId) -> bool;

    /// Owning account, or `None` when the property is unknown or its owner
    /// cannot be resolved.
    fn resolve_owning_account(&self, property_id: PropertyId) -> Option<AccountId>;
}

/// Directory backed by a map. Used in tests and local wiring.
#[derive(Debug, Default)]
pub struct InMemoryPropertyDirectory {
    properties: RwLock<HashMap<PropertyId, Option<AccountId>>>,
}

impl InMemoryPropertyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property owned by `owner`.
    pub fn register(&self, property_id: PropertyId, owner: AccountId) {
        self.write().insert(property_id, Some(owner));
    }

    /// Register a property whose owner cannot be resolved.
    pub fn register_orphan(&self, property_id: PropertyId) {
        self.write().insert(property_id, None);
    }

    pub fn remove(&self, property_id: PropertyId) {
        self.write().remove(&property_id);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PropertyId, Option<AccountId>>> {
        self.properties.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PropertyDirectory for InMemoryPropertyDirectory {
    fn property_exists(&self, property_id: PropertyId) -> bool {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&property_id)
    }

    fn resolve_owning_account(&self, property_id: PropertyId) -> Option<AccountId> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&property_id)
            .copied()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphaned_properties_exist_without_an_owner() {
        let directory = InMemoryPropertyDirectory::new();
        let owned = PropertyId::new();
        let orphan = PropertyId::new();
        let owner = AccountId::new();

        directory.register(owned, owner);
        directory.register_orphan(orphan);

        assert_eq!(directory.resolve_owning_account(owned), Some(owner));
        assert!(directory.property_exists(orphan));
        assert_eq!(directory.resolve_owning_account(orphan), None);
        assert!(!directory.property_exists(PropertyId::new()));
    }
}
