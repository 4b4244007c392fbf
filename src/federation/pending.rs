//! Pending federation: members staged by vote until committed

use bitcoin::PublicKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use super::{Federation, FederationError, FederationMember};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFederation {
    members: Vec<FederationMember>,
}

impl PendingFederation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[FederationMember] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_complete(&self, min_size: usize) -> bool {
        self.members.len() >= min_size
    }

    /// Whether any member already uses one of the candidate's keys in the same role
    pub fn conflicts_with(&self, candidate: &FederationMember) -> bool {
        self.members.iter().any(|m| {
            m.btc_public_key == candidate.btc_public_key
                || m.host_public_key == candidate.host_public_key
                || m.mst_public_key == candidate.mst_public_key
        })
    }

    pub fn add_member(&mut self, member: FederationMember) {
        self.members.push(member);
    }

    /// Keccak-256 over the sorted BTC keys, which voters must echo back on commit
    pub fn hash(&self) -> [u8; 32] {
        let mut keys: Vec<Vec<u8>> = self
            .members
            .iter()
            .map(|m| m.btc_public_key.to_bytes())
            .collect();
        keys.sort();

        let mut hasher = Keccak256::new();
        hasher.update((keys.len() as u32).to_be_bytes());
        for key in &keys {
            hasher.update([key.len() as u8]);
            hasher.update(key);
        }
        hasher.finalize().into()
    }

    pub fn btc_public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.members.iter().map(|m| &m.btc_public_key)
    }

    pub fn build_federation(
        &self,
        creation_time_ms: u64,
        creation_block_number: u64,
        network: bitcoin::Network,
    ) -> Result<Federation, FederationError> {
        Federation::new(
            self.members.clone(),
            creation_time_ms,
            creation_block_number,
            network,
        )
    }
}
