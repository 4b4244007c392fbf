//! N-of-M Elections
//!
//! Privileged bridge changes (federation membership, fee per kB) are not
//! applied by a single caller. Each authorized voter casts a ballot for a
//! concrete call; once enough voters agree on the same call it wins and the
//! bridge executes it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::host::HostAddress;

/// A call being voted on: function name plus raw arguments
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbiCallSpec {
    pub function: String,
    #[serde(with = "hex_arguments")]
    pub arguments: Vec<Vec<u8>>,
}

impl AbiCallSpec {
    pub fn new(function: impl Into<String>, arguments: Vec<Vec<u8>>) -> Self {
        Self {
            function: function.into(),
            arguments,
        }
    }
}

impl fmt::Display for AbiCallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.arguments.iter().map(hex::encode).collect();
        write!(f, "{}({})", self.function, args.join(", "))
    }
}

mod hex_arguments {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(args: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(args.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// How many authorized voters must agree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizerPolicy {
    /// Any single authorized voter decides
    One,
    /// More than half of the authorized voters
    Majority,
    /// Every authorized voter
    All,
}

/// A fixed set of host addresses allowed to vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBasedAuthorizer {
    authorized: BTreeSet<HostAddress>,
    policy: AuthorizerPolicy,
}

impl AddressBasedAuthorizer {
    pub fn new(authorized: impl IntoIterator<Item = HostAddress>, policy: AuthorizerPolicy) -> Self {
        Self {
            authorized: authorized.into_iter().collect(),
            policy,
        }
    }

    pub fn is_authorized(&self, address: &HostAddress) -> bool {
        self.authorized.contains(address)
    }

    pub fn required_votes(&self) -> usize {
        match self.policy {
            AuthorizerPolicy::One => 1,
            AuthorizerPolicy::Majority => self.authorized.len() / 2 + 1,
            AuthorizerPolicy::All => self.authorized.len(),
        }
    }

    pub fn policy(&self) -> AuthorizerPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.authorized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorized.is_empty()
    }
}

/// Ballots cast so far, per call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Ballot>", into = "Vec<Ballot>")]
pub struct AbiCallElection {
    votes: BTreeMap<AbiCallSpec, BTreeSet<HostAddress>>,
}

// JSON maps need string keys, so the election persists as a list.
#[derive(Serialize, Deserialize)]
struct Ballot {
    spec: AbiCallSpec,
    voters: BTreeSet<HostAddress>,
}

impl From<Vec<Ballot>> for AbiCallElection {
    fn from(ballots: Vec<Ballot>) -> Self {
        Self {
            votes: ballots.into_iter().map(|b| (b.spec, b.voters)).collect(),
        }
    }
}

impl From<AbiCallElection> for Vec<Ballot> {
    fn from(election: AbiCallElection) -> Self {
        election
            .votes
            .into_iter()
            .map(|(spec, voters)| Ballot { spec, voters })
            .collect()
    }
}

impl AbiCallElection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote; false when the voter is unauthorized or already voted for this call
    pub fn vote(
        &mut self,
        spec: AbiCallSpec,
        voter: HostAddress,
        authorizer: &AddressBasedAuthorizer,
    ) -> bool {
        if !authorizer.is_authorized(&voter) {
            return false;
        }
        self.votes.entry(spec).or_default().insert(voter)
    }

    /// First call, in `AbiCallSpec` order, whose voters reach the authorizer's quorum
    ///
    /// This is not the first call to have reached it. Callers execute and
    /// clear the election on every win.
    pub fn winner(&self, authorizer: &AddressBasedAuthorizer) -> Option<&AbiCallSpec> {
        let required = authorizer.required_votes();
        self.votes
            .iter()
            .find(|(_, voters)| voters.len() >= required)
            .map(|(spec, _)| spec)
    }

    /// Drop the winning call's ballots, leaving the others in place
    pub fn clear_winners(&mut self, authorizer: &AddressBasedAuthorizer) {
        if let Some(spec) = self.winner(authorizer).cloned() {
            self.votes.remove(&spec);
        }
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }

    pub fn votes(&self) -> &BTreeMap<AbiCallSpec, BTreeSet<HostAddress>> {
        &self.votes
    }

    pub fn voters_for(&self, spec: &AbiCallSpec) -> usize {
        self.votes.get(spec).map_or(0, BTreeSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> HostAddress {
        HostAddress([n; 20])
    }

    fn authorizer(policy: AuthorizerPolicy) -> AddressBasedAuthorizer {
        AddressBasedAuthorizer::new((1..=5).map(addr), policy)
    }

    #[test]
    fn test_required_votes() {
        assert_eq!(authorizer(AuthorizerPolicy::One).required_votes(), 1);
        assert_eq!(authorizer(AuthorizerPolicy::Majority).required_votes(), 3);
        assert_eq!(authorizer(AuthorizerPolicy::All).required_votes(), 5);
    }

    #[test]
    fn test_majority_wins_only_at_quorum() {
        let auth = authorizer(AuthorizerPolicy::Majority);
        let mut election = AbiCallElection::new();
        let spec = AbiCallSpec::new("create", vec![]);

        assert!(election.vote(spec.clone(), addr(1), &auth));
        assert!(election.vote(spec.clone(), addr(2), &auth));
        assert!(election.winner(&auth).is_none());

        assert!(election.vote(spec.clone(), addr(3), &auth));
        assert_eq!(election.winner(&auth), Some(&spec));
    }

    #[test]
    fn test_duplicate_and_unauthorized_votes_rejected() {
        let auth = authorizer(AuthorizerPolicy::Majority);
        let mut election = AbiCallElection::new();
        let spec = AbiCallSpec::new("rollback", vec![]);

        assert!(election.vote(spec.clone(), addr(1), &auth));
        assert!(!election.vote(spec.clone(), addr(1), &auth));
        assert!(!election.vote(spec.clone(), addr(9), &auth));
        assert_eq!(election.voters_for(&spec), 1);
    }

    #[test]
    fn test_clear_winners_keeps_other_ballots() {
        let auth = authorizer(AuthorizerPolicy::One);
        let mut election = AbiCallElection::new();
        let winning = AbiCallSpec::new("add", vec![vec![1]]);
        let other = AbiCallSpec::new("add", vec![vec![2]]);

        election.vote(winning.clone(), addr(1), &auth);
        election.votes.entry(other.clone()).or_default();

        election.clear_winners(&auth);
        assert_eq!(election.voters_for(&winning), 0);
        assert!(election.votes().contains_key(&other));

        election.clear();
        assert!(election.votes().is_empty());
    }

    #[test]
    fn test_election_serializes_as_ballot_list() {
        let auth = authorizer(AuthorizerPolicy::Majority);
        let mut election = AbiCallElection::new();
        election.vote(AbiCallSpec::new("commit", vec![vec![0xab; 4]]), addr(2), &auth);

        let json = serde_json::to_value(&election).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["spec"]["arguments"][0], "abababab");

        let back: AbiCallElection = serde_json::from_value(json).unwrap();
        assert_eq!(back, election);
    }
}
