//! Shared fixtures for the integration tests
//!
//! The regtest genesis federation is made of the keys for secrets 1, 2 and 3,
//! so `signer(1..=3)` can sign releases. Voters 31..=33 are authorized for
//! every election.

#![allow(dead_code)]

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version};
use bitcoin::consensus::serialize;
use bitcoin::hashes::Hash;
use bitcoin::merkle_tree::PartialMerkleTree;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{
    Amount, BlockHash, CompactTarget, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness,
};

use fedpeg::units::sats_to_wei;
use fedpeg::{
    AddressBasedAuthorizer, AuthorizerPolicy, BridgeConstants, BridgeState, BridgeSupport,
    BtcChain, ExecutionBlock, HostAddress, HostLedger, HostTransaction, HostTxHash,
    MemoryBtcChain, MemoryLedger, MerkleBranch, ReleaseSigner, SingleKeySigner, BRIDGE_ADDRESS,
};

pub const CHECKPOINT_HEIGHT: u32 = 100;

pub fn signer(n: u8) -> SingleKeySigner {
    let mut secret = [0u8; 32];
    secret[31] = n;
    SingleKeySigner::from_bytes(&secret).unwrap()
}

pub fn key(n: u8) -> PublicKey {
    signer(n).public_key()
}

/// Signed host transaction from the holder of `key(n)`
pub fn host_tx(n: u8, hash: u8, value: u128) -> HostTransaction {
    HostTransaction::signed_by(HostTxHash([hash; 32]), key(n), value)
}

pub fn voter_tx(n: u8) -> HostTransaction {
    host_tx(n, n, 0)
}

pub fn host_address(n: u8) -> HostAddress {
    HostAddress::from_public_key(&key(n))
}

/// Legacy P2PKH address string of `key(n)` on regtest
pub fn btc_address(n: u8) -> String {
    bitcoin::Address::p2pkh(key(n).pubkey_hash(), bitcoin::Network::Regtest).to_string()
}

pub fn constants() -> BridgeConstants {
    let voters: Vec<HostAddress> = (31..=33).map(host_address).collect();
    BridgeConstants::regtest_default()
        .unwrap()
        .with_federation_change_authorizer(AddressBasedAuthorizer::new(
            voters.clone(),
            AuthorizerPolicy::Majority,
        ))
        .with_fee_per_kb_change_authorizer(AddressBasedAuthorizer::new(
            voters.clone(),
            AuthorizerPolicy::Majority,
        ))
        .with_lock_whitelist_change_authorizer(AddressBasedAuthorizer::new(
            voters,
            AuthorizerPolicy::One,
        ))
}

/// A bitcoin transaction from `key(sender)` paying `sats` to `destination`
pub fn pegin_tx(sender: u8, destination: &ScriptBuf, sats: u64) -> Transaction {
    let script_sig = Builder::new()
        .push_slice(PushBytesBuf::try_from(vec![0x30; 71]).unwrap())
        .push_slice(PushBytesBuf::try_from(key(sender).to_bytes()).unwrap())
        .into_script();

    Transaction {
        version: bitcoin::transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([sender; 32]),
                vout: sats as u32,
            },
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: destination.clone(),
        }],
    }
}

/// Transaction every mined block carries ahead of the mined ones
pub fn filler_txid(height: u32) -> Txid {
    let mut filler = [0u8; 32];
    filler[..4].copy_from_slice(&height.to_le_bytes());
    Txid::from_byte_array(filler)
}

/// Branch proving a transaction mined alone by `Harness::mine` at `height`
pub fn lone_tx_branch(height: u32) -> MerkleBranch {
    MerkleBranch::new(vec![filler_txid(height).to_byte_array()], 0b1).unwrap()
}

/// Owned state, chain and ledger a `BridgeSupport` borrows per invocation
pub struct Harness {
    pub constants: BridgeConstants,
    pub state: BridgeState,
    pub chain: MemoryBtcChain,
    pub ledger: MemoryLedger,
}

impl Harness {
    pub fn new() -> Self {
        let checkpoint = Header {
            version: Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };

        let mut ledger = MemoryLedger::new();
        ledger.credit(BRIDGE_ADDRESS, sats_to_wei(Amount::MAX_MONEY));

        Self {
            constants: constants(),
            state: BridgeState::default(),
            chain: MemoryBtcChain::new(checkpoint, CHECKPOINT_HEIGHT),
            ledger,
        }
    }

    pub fn bridge(&mut self, block: u64) -> BridgeSupport<'_, MemoryBtcChain, MemoryLedger> {
        BridgeSupport::new(
            &self.constants,
            &mut self.state,
            &mut self.chain,
            &mut self.ledger,
            ExecutionBlock {
                number: block,
                timestamp_ms: block * 1_000,
            },
        )
    }

    pub fn genesis_script(&self) -> ScriptBuf {
        self.constants.genesis_federation.p2sh_script()
    }

    pub fn balance(&self, address: &HostAddress) -> u128 {
        self.ledger.balance(address)
    }

    /// Mine a block holding `txs` plus a filler; returns its height and a proof of `txs`
    pub fn mine(&mut self, txs: &[Transaction]) -> (u32, Vec<u8>) {
        let height = self.chain.best_height() + 1;
        let mut txids = vec![filler_txid(height)];
        txids.extend(txs.iter().map(Transaction::compute_txid));
        let matches: Vec<bool> = (0..txids.len()).map(|i| i > 0).collect();

        let tree = PartialMerkleTree::from_txids(&txids, &matches);
        let mut found = Vec::new();
        let mut indexes = Vec::new();
        let root = tree.extract_matches(&mut found, &mut indexes).unwrap();

        let tip = self.chain.header_at_height(height - 1).unwrap();
        let header = Header {
            version: Version::ONE,
            prev_blockhash: tip.block_hash(),
            merkle_root: root,
            time: height,
            bits: tip.bits,
            nonce: 0,
        };
        self.chain.add_header(header).unwrap();

        (height, serialize(&tree))
    }

    pub fn mine_empty(&mut self, count: u32) {
        for _ in 0..count {
            self.mine(&[]);
        }
    }

    /// Mine `tx` and enough blocks on top to confirm it
    pub fn mine_confirmed(&mut self, tx: &Transaction) -> (u32, Vec<u8>) {
        let mined = self.mine(std::slice::from_ref(tx));
        self.mine_empty(self.constants.btc2host_min_confirmations - 1);
        mined
    }

    /// Whitelist `key(sender)` for one lock up to `max`
    pub fn whitelist_one_off(&mut self, block: u64, sender: u8, max: Amount) {
        let address = btc_address(sender);
        let code = self
            .bridge(block)
            .add_one_off_lock_whitelist_address(&voter_tx(31), &address, max, 1);
        assert_eq!(code, fedpeg::codes::LOCK_WHITELIST_SUCCESS);
    }
}
