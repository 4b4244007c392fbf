//! Bitcoin SPV Verification
//!
//! Verifies Bitcoin transaction inclusion against the bridge's local header
//! chain: partial Merkle trees for peg-in registration, plain Merkle branches
//! for confirmation queries.

use bitcoin::block::Header;
use bitcoin::consensus::encode::{deserialize, deserialize_partial, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::merkle_tree::PartialMerkleTree;
use bitcoin::{BlockHash, Txid};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Size of the transaction count prefix of a serialized partial Merkle tree
const PMT_TX_COUNT_SIZE: usize = 4;

/// Merkle branches are encoded with a 32-bit path
const MAX_BRANCH_HASHES: usize = 32;

/// SPV-related errors
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("unexpected partial merkle tree size: {0} bytes")]
    UnexpectedSize(usize),
    #[error("invalid merkle proof: {0}")]
    InvalidMerkleProof(String),
    #[error("transaction {0} not in merkle proof")]
    TxNotInProof(Txid),
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Header chain errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("parent block not found: {0}")]
    UnknownParent(BlockHash),
    #[error("header already stored: {0}")]
    Duplicate(BlockHash),
}

/// A header together with its height in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredHeader {
    pub header: Header,
    pub height: u32,
}

/// The bridge's view of the bitcoin header chain
pub trait BtcChain {
    /// Height of the best chain tip
    fn best_height(&self) -> u32;

    /// Height of the first header the chain was seeded with
    fn initial_height(&self) -> u32;

    /// Header at a height of the best chain
    fn header_at_height(&self, height: u32) -> Option<Header>;

    /// Any stored header, on the best chain or not
    fn stored_header(&self, hash: &BlockHash) -> Option<StoredHeader>;

    /// Connect a header to a stored parent
    fn add_header(&mut self, header: Header) -> Result<(), ChainError>;
}

/// In-memory header chain following the longest branch
///
/// Proof of work is not checked.
#[derive(Debug, Clone)]
pub struct MemoryBtcChain {
    headers: BTreeMap<BlockHash, StoredHeader>,
    /// Best chain hashes, indexed by `height - initial_height`
    main_chain: Vec<BlockHash>,
    initial_height: u32,
}

impl MemoryBtcChain {
    /// Seed the chain with a checkpoint header
    pub fn new(checkpoint: Header, height: u32) -> Self {
        let hash = checkpoint.block_hash();
        let mut headers = BTreeMap::new();
        headers.insert(
            hash,
            StoredHeader {
                header: checkpoint,
                height,
            },
        );

        Self {
            headers,
            main_chain: vec![hash],
            initial_height: height,
        }
    }

    fn reorganize_to(&mut self, tip: StoredHeader) {
        let mut cursor = tip;
        let mut branch = Vec::new();

        loop {
            let offset = (cursor.height - self.initial_height) as usize;
            let hash = cursor.header.block_hash();
            if self.main_chain.get(offset) == Some(&hash) {
                break;
            }
            branch.push((offset, hash));

            match self.headers.get(&cursor.header.prev_blockhash) {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }

        for (offset, hash) in branch.into_iter().rev() {
            self.main_chain.truncate(offset);
            self.main_chain.push(hash);
        }
    }
}

impl BtcChain for MemoryBtcChain {
    fn best_height(&self) -> u32 {
        self.initial_height + self.main_chain.len() as u32 - 1
    }

    fn initial_height(&self) -> u32 {
        self.initial_height
    }

    fn header_at_height(&self, height: u32) -> Option<Header> {
        let offset = height.checked_sub(self.initial_height)? as usize;
        let hash = self.main_chain.get(offset)?;
        self.headers.get(hash).map(|stored| stored.header)
    }

    fn stored_header(&self, hash: &BlockHash) -> Option<StoredHeader> {
        self.headers.get(hash).copied()
    }

    fn add_header(&mut self, header: Header) -> Result<(), ChainError> {
        let hash = header.block_hash();
        if self.headers.contains_key(&hash) {
            return Err(ChainError::Duplicate(hash));
        }

        let parent = self
            .headers
            .get(&header.prev_blockhash)
            .ok_or(ChainError::UnknownParent(header.prev_blockhash))?;

        let stored = StoredHeader {
            header,
            height: parent.height + 1,
        };
        self.headers.insert(hash, stored);

        if stored.height > self.best_height() {
            self.reorganize_to(stored);
        }
        Ok(())
    }
}

/// A parsed partial Merkle tree proving transactions of one block
#[derive(Debug, Clone)]
pub struct PartialMerkleProof {
    tree: PartialMerkleTree,
}

impl PartialMerkleProof {
    /// Whether the serialized tree is exactly as long as its own counts declare
    pub fn has_expected_size(bytes: &[u8]) -> bool {
        Self::expected_size(bytes).map_or(false, |size| size == bytes.len())
    }

    fn expected_size(bytes: &[u8]) -> Option<usize> {
        let mut offset = PMT_TX_COUNT_SIZE;

        let (hash_count, used) = deserialize_partial::<VarInt>(bytes.get(offset..)?).ok()?;
        offset = offset
            .checked_add(used)?
            .checked_add(usize::try_from(hash_count.0).ok()?.checked_mul(32)?)?;

        let (flag_bytes, used) = deserialize_partial::<VarInt>(bytes.get(offset..)?).ok()?;
        offset
            .checked_add(used)?
            .checked_add(usize::try_from(flag_bytes.0).ok()?)
    }

    /// Parse a serialized partial Merkle tree
    pub fn parse(bytes: &[u8]) -> Result<Self, SpvError> {
        if !Self::has_expected_size(bytes) {
            return Err(SpvError::UnexpectedSize(bytes.len()));
        }

        let tree: PartialMerkleTree =
            deserialize(bytes).map_err(|e| SpvError::ParseError(e.to_string()))?;
        Ok(Self { tree })
    }

    /// Compute the Merkle root, requiring `txid` among the matched leaves
    pub fn root_for(&self, txid: &Txid) -> Result<[u8; 32], SpvError> {
        let mut matches = Vec::new();
        let mut indexes = Vec::new();

        let root = self
            .tree
            .extract_matches(&mut matches, &mut indexes)
            .map_err(|e| SpvError::InvalidMerkleProof(e.to_string()))?;

        if !matches.contains(txid) {
            return Err(SpvError::TxNotInProof(*txid));
        }

        Ok(root.to_byte_array())
    }
}

/// Merkle branch from a transaction up to a block's Merkle root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    /// Sibling hashes in internal byte order, leaf to root
    hashes: Vec<[u8; 32]>,
    /// Bit `i` set: the sibling at level `i` is on the left
    path: u32,
}

impl MerkleBranch {
    pub fn new(hashes: Vec<[u8; 32]>, path: u32) -> Result<Self, SpvError> {
        if hashes.len() > MAX_BRANCH_HASHES {
            return Err(SpvError::InvalidMerkleProof(format!(
                "{} hashes exceed the maximum of {}",
                hashes.len(),
                MAX_BRANCH_HASHES
            )));
        }

        // No bits may be set beyond the branch height
        if (path.leading_zeros() as usize) < MAX_BRANCH_HASHES - hashes.len() {
            return Err(SpvError::InvalidMerkleProof(format!(
                "path {:#x} has more bits than {} hashes",
                path,
                hashes.len()
            )));
        }

        Ok(Self { hashes, path })
    }

    pub fn hashes(&self) -> &[[u8; 32]] {
        &self.hashes
    }

    pub fn path(&self) -> u32 {
        self.path
    }

    /// Root obtained by folding the branch over a transaction hash
    pub fn reduce_from(&self, txid: &Txid) -> [u8; 32] {
        let mut current = txid.to_byte_array();

        for (level, sibling) in self.hashes.iter().enumerate() {
            let sibling_on_left = (self.path >> level) & 1 == 1;
            current = if sibling_on_left {
                double_sha256_pair(sibling, &current)
            } else {
                double_sha256_pair(&current, sibling)
            };
        }

        current
    }

    /// Whether the branch proves `txid` under the header's Merkle root
    pub fn proves(&self, txid: &Txid, header: &Header) -> bool {
        self.reduce_from(txid) == header.merkle_root.to_byte_array()
    }
}

/// Transaction hash of a legacy-serialized transaction
pub fn raw_tx_hash(raw: &[u8]) -> Txid {
    Txid::from_byte_array(double_sha256(raw))
}

/// Input count declared by a raw transaction, read before full parsing
pub fn declared_input_count(raw: &[u8]) -> Result<u64, SpvError> {
    let tail = raw
        .get(4..)
        .ok_or_else(|| SpvError::ParseError("transaction shorter than its version".to_string()))?;
    let (count, _) =
        deserialize_partial::<VarInt>(tail).map_err(|e| SpvError::ParseError(e.to_string()))?;
    Ok(count.0)
}

/// Double SHA256 hash (Bitcoin standard)
fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Double SHA256 hash of two 32-byte values concatenated
fn double_sha256_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[0..32].copy_from_slice(left);
    combined[32..64].copy_from_slice(right);
    double_sha256(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::consensus::encode::serialize;
    use bitcoin::{CompactTarget, TxMerkleNode};

    fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    fn header(prev: BlockHash, merkle_root: [u8; 32], nonce: u32) -> Header {
        Header {
            version: Version::ONE,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::from_byte_array(merkle_root),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        }
    }

    #[test]
    fn test_double_sha256() {
        // sha256d("hello")
        let hash = double_sha256(b"hello");
        assert_eq!(
            hex::encode(hash),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_partial_merkle_proof_roundtrip() {
        let txids = vec![txid(1), txid(2), txid(3)];
        let tree = PartialMerkleTree::from_txids(&txids, &[false, true, false]);
        let bytes = serialize(&tree);

        assert!(PartialMerkleProof::has_expected_size(&bytes));
        let proof = PartialMerkleProof::parse(&bytes).unwrap();
        assert!(proof.root_for(&txid(2)).is_ok());
        assert!(matches!(
            proof.root_for(&txid(1)),
            Err(SpvError::TxNotInProof(_))
        ));
    }

    #[test]
    fn test_partial_merkle_proof_rejects_trailing_bytes() {
        let tree = PartialMerkleTree::from_txids(&[txid(1)], &[true]);
        let mut bytes = serialize(&tree);
        bytes.push(0);

        assert!(!PartialMerkleProof::has_expected_size(&bytes));
        assert!(matches!(
            PartialMerkleProof::parse(&bytes),
            Err(SpvError::UnexpectedSize(_))
        ));
        assert!(!PartialMerkleProof::has_expected_size(&[1, 0]));
    }

    #[test]
    fn test_merkle_branch_proves() {
        let left = txid(1);
        let right = txid(2);
        let root = double_sha256_pair(&left.to_byte_array(), &right.to_byte_array());
        let block = header(BlockHash::all_zeros(), root, 0);

        let for_right = MerkleBranch::new(vec![left.to_byte_array()], 0b1).unwrap();
        assert!(for_right.proves(&right, &block));
        assert!(!for_right.proves(&left, &block));

        let for_left = MerkleBranch::new(vec![right.to_byte_array()], 0b0).unwrap();
        assert!(for_left.proves(&left, &block));
    }

    #[test]
    fn test_merkle_branch_rejects_extra_path_bits() {
        assert!(MerkleBranch::new(vec![[0u8; 32]], 0b10).is_err());
        assert!(MerkleBranch::new(vec![[0u8; 32]; 33], 0).is_err());
    }

    #[test]
    fn test_declared_input_count() {
        assert_eq!(declared_input_count(&[1, 0, 0, 0, 0]).unwrap(), 0);
        assert_eq!(declared_input_count(&[1, 0, 0, 0, 2]).unwrap(), 2);
        assert!(declared_input_count(&[1, 0]).is_err());
    }

    #[test]
    fn test_memory_chain_follows_longest_branch() {
        let genesis = header(BlockHash::all_zeros(), [0u8; 32], 0);
        let mut chain = MemoryBtcChain::new(genesis, 100);

        let a1 = header(genesis.block_hash(), [1u8; 32], 1);
        chain.add_header(a1).unwrap();
        assert_eq!(chain.best_height(), 101);
        assert_eq!(chain.header_at_height(101), Some(a1));

        // Competing branch overtakes once it is longer
        let b1 = header(genesis.block_hash(), [2u8; 32], 2);
        let b2 = header(b1.block_hash(), [3u8; 32], 3);
        chain.add_header(b1).unwrap();
        assert_eq!(chain.header_at_height(101), Some(a1));
        chain.add_header(b2).unwrap();

        assert_eq!(chain.best_height(), 102);
        assert_eq!(chain.header_at_height(101), Some(b1));
        assert_eq!(chain.stored_header(&a1.block_hash()).unwrap().height, 101);
        assert!(matches!(chain.add_header(b2), Err(ChainError::Duplicate(_))));

        let orphan = header(BlockHash::from_byte_array([9u8; 32]), [0u8; 32], 4);
        assert!(matches!(
            chain.add_header(orphan),
            Err(ChainError::UnknownParent(_))
        ));
    }
}
