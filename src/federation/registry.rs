//! Federation slots and the active/retiring resolution rules
//!
//! Storage only knows a *new* and an *old* slot. Which federation is active
//! depends on the executing block: a freshly committed federation waits
//! `activation_age` blocks, during which the old one stays active.

use serde::{Deserialize, Serialize};

use super::{Federation, PendingFederation};

/// Which slot currently plays a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationReference {
    /// Nothing was ever committed
    Genesis,
    Old,
    New,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRegistry {
    pub new_federation: Option<Federation>,
    pub old_federation: Option<Federation>,
    pub pending_federation: Option<PendingFederation>,
}

impl FederationRegistry {
    fn is_new_active(&self, new: &Federation, activation_age: u64, block_number: u64) -> bool {
        block_number.saturating_sub(new.creation_block_number()) >= activation_age
    }

    pub fn active_reference(&self, activation_age: u64, block_number: u64) -> FederationReference {
        match (&self.new_federation, &self.old_federation) {
            (None, _) => FederationReference::Genesis,
            (Some(_), None) => FederationReference::New,
            (Some(new), Some(_)) => {
                if self.is_new_active(new, activation_age, block_number) {
                    FederationReference::New
                } else {
                    FederationReference::Old
                }
            }
        }
    }

    pub fn active<'a>(
        &'a self,
        genesis: &'a Federation,
        activation_age: u64,
        block_number: u64,
    ) -> &'a Federation {
        match self.active_reference(activation_age, block_number) {
            FederationReference::Genesis => genesis,
            FederationReference::Old => self.old_federation.as_ref().unwrap_or(genesis),
            FederationReference::New => self.new_federation.as_ref().unwrap_or(genesis),
        }
    }

    /// The old federation, once the new one has taken over
    pub fn retiring(&self, activation_age: u64, block_number: u64) -> Option<&Federation> {
        match (&self.new_federation, &self.old_federation) {
            (Some(new), Some(old)) if self.is_new_active(new, activation_age, block_number) => {
                Some(old)
            }
            _ => None,
        }
    }

    /// A committed federation still waiting to become active
    pub fn is_awaiting_activation(&self, activation_age: u64, block_number: u64) -> bool {
        matches!(
            self.active_reference(activation_age, block_number),
            FederationReference::Old
        )
    }

    pub fn pending(&self) -> Option<&PendingFederation> {
        self.pending_federation.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::tests::key;
    use crate::federation::FederationMember;

    fn federation(seed: u8, block: u64) -> Federation {
        let members = (seed..seed + 3)
            .map(|n| FederationMember::from_single_key(key(n)))
            .collect();
        Federation::new(members, 0, block, bitcoin::Network::Regtest).unwrap()
    }

    #[test]
    fn test_genesis_when_nothing_committed() {
        let genesis = federation(1, 0);
        let registry = FederationRegistry::default();

        assert_eq!(registry.active_reference(10, 500), FederationReference::Genesis);
        assert_eq!(registry.active(&genesis, 10, 500), &genesis);
        assert!(registry.retiring(10, 500).is_none());
    }

    #[test]
    fn test_activation_age_switches_roles() {
        let genesis = federation(1, 0);
        let new = federation(10, 100);
        let registry = FederationRegistry {
            new_federation: Some(new.clone()),
            old_federation: Some(genesis.clone()),
            pending_federation: None,
        };

        // Before activation the old federation keeps signing
        assert_eq!(registry.active(&genesis, 10, 109), &genesis);
        assert!(registry.is_awaiting_activation(10, 109));
        assert!(registry.retiring(10, 109).is_none());

        assert_eq!(registry.active(&genesis, 10, 110), &new);
        assert!(!registry.is_awaiting_activation(10, 110));
        assert_eq!(registry.retiring(10, 110), Some(&genesis));
    }

    #[test]
    fn test_new_without_old_is_active() {
        let genesis = federation(1, 0);
        let new = federation(10, 100);
        let registry = FederationRegistry {
            new_federation: Some(new.clone()),
            old_federation: None,
            pending_federation: None,
        };

        assert_eq!(registry.active(&genesis, 10, 101), &new);
        assert!(registry.retiring(10, 101).is_none());
    }
}
