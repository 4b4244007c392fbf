//! Signature Aggregator
//!
//! Release transactions waiting for federator signatures, keyed by the host
//! transaction that promoted them. Federators submit one signature per
//! input; slots are kept in redeem-script key order so the final scriptSig
//! satisfies `OP_CHECKMULTISIG`.

use bitcoin::secp256k1::{ecdsa, Message, Secp256k1, VerifyOnly};
use bitcoin::{PublicKey, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::script_sig::{self, chunks, legacy_sighash, redeem_script, redeem_script_keys};
use super::tx_hex;
use crate::host::HostTxHash;

/// Result of submitting signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningOutcome {
    /// The key belongs to no live federation
    UnknownFederator,
    /// Nothing waits for signatures under this hash
    NoPendingTransaction,
    /// One signature per input is required
    SignatureCountMismatch { expected: usize, received: usize },
    /// A signature failed to parse, was not low-S or did not verify
    InvalidSignature { input: usize },
    /// The key is part of no input's redeem script
    NotAFederationKey { input: usize },
    /// An input carries a signature no redeem-script key produced
    MalformedTransaction { input: usize },
    AlreadySigned,
    PartiallySigned,
    /// Enough signatures; the transaction left the pending set
    FullySigned,
}

impl SigningOutcome {
    /// Whether the stored transaction changed
    pub fn applied(&self) -> bool {
        matches!(self, SigningOutcome::PartiallySigned | SigningOutcome::FullySigned)
    }
}

/// What happened to one input
enum InputSigning {
    Signed,
    AlreadySigned,
    /// Spent by a federation the key is not part of
    Foreign,
    Rejected(SigningOutcome),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignatures {
    #[serde(with = "tx_map")]
    transactions: BTreeMap<HostTxHash, Transaction>,
}

mod tx_map {
    use super::{HostTxHash, Transaction};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Hex(#[serde(with = "crate::release::tx_hex")] Transaction);

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<HostTxHash, Transaction>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, Hex(v.clone()))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<HostTxHash, Transaction>, D::Error> {
        let raw = BTreeMap::<HostTxHash, Hex>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, Hex(tx))| (k, tx)).collect())
    }
}

impl PendingSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: HostTxHash, tx: Transaction) {
        self.transactions.insert(hash, tx);
    }

    pub fn get(&self, hash: &HostTxHash) -> Option<&Transaction> {
        self.transactions.get(hash)
    }

    pub fn contains(&self, hash: &HostTxHash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostTxHash, &Transaction)> {
        self.transactions.iter()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Add one DER signature per input from `key` to the transaction under `hash`
    ///
    /// Every signature is checked before anything changes. Inputs are then
    /// signed on a copy, which replaces the stored transaction.
    pub fn add_signature(
        &mut self,
        hash: &HostTxHash,
        key: &PublicKey,
        signatures: &[Vec<u8>],
    ) -> SigningOutcome {
        let Some(stored) = self.transactions.get(hash) else {
            warn!(%hash, "No transaction waiting for signatures, probably fully signed already");
            return SigningOutcome::NoPendingTransaction;
        };

        if stored.input.len() != signatures.len() {
            warn!(
                %hash,
                expected = stored.input.len(),
                received = signatures.len(),
                "Signature count does not match input count"
            );
            return SigningOutcome::SignatureCountMismatch {
                expected: stored.input.len(),
                received: signatures.len(),
            };
        }

        let secp = Secp256k1::verification_only();

        let mut sighashes = Vec::with_capacity(stored.input.len());
        let mut parsed = Vec::with_capacity(stored.input.len());
        for (index, der) in signatures.iter().enumerate() {
            let Some(sighash) = redeem_script(&stored.input[index].script_sig)
                .and_then(|redeem| legacy_sighash(stored, index, &redeem))
            else {
                warn!(%hash, input = index, "Input has no redeem script to sign");
                return SigningOutcome::MalformedTransaction { input: index };
            };

            match verify_signature(&secp, der, &sighash, key) {
                Some(sig) => {
                    sighashes.push(sighash);
                    parsed.push(sig);
                }
                None => {
                    warn!(%hash, input = index, signature = %hex::encode(der), %key, "Invalid signature");
                    return SigningOutcome::InvalidSignature { input: index };
                }
            }
        }

        let mut signed = stored.clone();
        let mut already_signed = false;
        let mut foreign = 0;
        for index in 0..signed.input.len() {
            match sign_input(&secp, &mut signed, index, key, &sighashes[index], &parsed[index]) {
                InputSigning::Signed => debug!(%hash, input = index, "Input signed"),
                InputSigning::Foreign => {
                    debug!(%hash, input = index, %key, "Input belongs to another federation");
                    foreign += 1;
                }
                InputSigning::AlreadySigned => {
                    warn!(%hash, input = index, %key, "Input already signed by this federator");
                    already_signed = true;
                    break;
                }
                InputSigning::Rejected(outcome) => {
                    warn!(%hash, input = index, %key, ?outcome, "Signature rejected");
                    return outcome;
                }
            }
        }

        if !already_signed && foreign == signed.input.len() {
            warn!(%hash, %key, "Key spends none of the inputs");
            return SigningOutcome::NotAFederationKey { input: 0 };
        }

        if script_sig::is_fully_signed(&signed) {
            info!(
                %hash,
                txid = %signed.compute_txid(),
                tx = %bitcoin::consensus::encode::serialize_hex(&signed),
                "Release transaction fully signed"
            );
            self.transactions.remove(hash);
            return SigningOutcome::FullySigned;
        }

        self.transactions.insert(*hash, signed);
        if already_signed {
            SigningOutcome::AlreadySigned
        } else {
            SigningOutcome::PartiallySigned
        }
    }
}

/// Parse and check a DER signature, requiring low-S
fn verify_signature(
    secp: &Secp256k1<VerifyOnly>,
    der: &[u8],
    sighash: &Message,
    key: &PublicKey,
) -> Option<ecdsa::Signature> {
    let sig = ecdsa::Signature::from_der(der).ok()?;

    let mut normalized = sig;
    normalized.normalize_s();
    if normalized != sig {
        return None;
    }

    secp.verify_ecdsa(sighash, &sig, &key.inner).ok()?;
    Some(sig)
}

/// Whether a filled slot (DER plus sighash byte) was produced by `key`
fn slot_signed_by(secp: &Secp256k1<VerifyOnly>, slot: &[u8], sighash: &Message, key: &PublicKey) -> bool {
    bitcoin::ecdsa::Signature::from_slice(slot)
        .map(|sig| secp.verify_ecdsa(sighash, &sig.signature, &key.inner).is_ok())
        .unwrap_or(false)
}

fn sign_input(
    secp: &Secp256k1<VerifyOnly>,
    tx: &mut Transaction,
    index: usize,
    key: &PublicKey,
    sighash: &Message,
    signature: &ecdsa::Signature,
) -> InputSigning {
    let malformed = InputSigning::Rejected(SigningOutcome::MalformedTransaction { input: index });

    let Some(mut parts) = chunks(&tx.input[index].script_sig) else {
        return malformed;
    };
    if parts.len() < 2 {
        return malformed;
    }
    let Some(redeem) = parts.pop() else {
        return malformed;
    };
    let slot_count = parts.len() - 1;

    let filled: Vec<Vec<u8>> = parts[1..].iter().filter(|c| !c.is_empty()).cloned().collect();
    if filled.iter().any(|slot| slot_signed_by(secp, slot, sighash, key)) {
        return InputSigning::AlreadySigned;
    }

    let keys = redeem_script_keys(bitcoin::Script::from_bytes(&redeem));
    let Some(my_index) = keys.iter().position(|k| k == key) else {
        return InputSigning::Foreign;
    };

    if filled.len() >= slot_count {
        // Every slot taken by other federators; nothing left to add here
        return InputSigning::Signed;
    }

    // Signatures must appear in the same order as their keys
    let mut insert_at = filled.len();
    for (position, slot) in filled.iter().enumerate() {
        let Some(signer_index) = keys
            .iter()
            .position(|k| slot_signed_by(secp, slot, sighash, k))
        else {
            return malformed;
        };
        if my_index < signer_index {
            insert_at = position;
            break;
        }
    }

    let mut new_sig = signature.serialize_der().to_vec();
    new_sig.push(bitcoin::sighash::EcdsaSighashType::All as u8);

    let mut sigs = filled;
    sigs.insert(insert_at, new_sig);

    let mut rebuilt = Vec::with_capacity(slot_count + 2);
    rebuilt.push(Vec::new());
    rebuilt.extend(sigs.iter().cloned());
    rebuilt.extend(std::iter::repeat(Vec::new()).take(slot_count - sigs.len()));
    rebuilt.push(redeem);

    match script_sig::build_script_sig(&rebuilt) {
        Some(script) => {
            tx.input[index].script_sig = script;
            InputSigning::Signed
        }
        None => malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::{Federation, FederationMember};
    use crate::release::script_sig::placeholder_script_sig;
    use crate::release::signer::{ReleaseSigner, SingleKeySigner};
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};

    fn signers() -> Vec<SingleKeySigner> {
        (1..=3u8).map(|n| SingleKeySigner::from_bytes(&[n; 32]).unwrap()).collect()
    }

    fn federation(signers: &[SingleKeySigner]) -> Federation {
        let members = signers
            .iter()
            .map(|s| FederationMember::from_single_key(s.public_key()))
            .collect();
        Federation::new(members, 0, 0, bitcoin::Network::Regtest).unwrap()
    }

    fn release_tx(federation: &Federation, inputs: u8) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: (0..inputs)
                .map(|n| TxIn {
                    previous_output: OutPoint::new(Txid::from_byte_array([n + 1; 32]), 0),
                    script_sig: placeholder_script_sig(&federation.redeem_script(), federation.threshold()),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: Amount::from_sat(90_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn pending_with(tx: Transaction) -> (PendingSignatures, HostTxHash) {
        let hash = HostTxHash([7u8; 32]);
        let mut pending = PendingSignatures::new();
        pending.insert(hash, tx);
        (pending, hash)
    }

    fn signed_keys(tx: &Transaction, input: usize, keys: &[PublicKey]) -> Vec<usize> {
        let secp = Secp256k1::verification_only();
        let redeem = redeem_script(&tx.input[input].script_sig).unwrap();
        let sighash = legacy_sighash(tx, input, &redeem).unwrap();
        let parts = chunks(&tx.input[input].script_sig).unwrap();
        parts[1..parts.len() - 1]
            .iter()
            .filter(|c| !c.is_empty())
            .map(|slot| keys.iter().position(|k| slot_signed_by(&secp, slot, &sighash, k)).unwrap())
            .collect()
    }

    #[test]
    fn test_two_of_three_signing_orders_slots() {
        let signers = signers();
        let federation = federation(&signers);
        let tx = release_tx(&federation, 2);
        let (mut pending, hash) = pending_with(tx.clone());
        let keys: Vec<PublicKey> = federation.btc_public_keys().copied().collect();

        // Sign with the key sorted last first, so the next must be inserted before it
        let last = signers.iter().find(|s| s.public_key() == keys[2]).unwrap();
        let first = signers.iter().find(|s| s.public_key() == keys[0]).unwrap();

        let sigs = last.sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &last.public_key(), &sigs),
            SigningOutcome::PartiallySigned
        );
        assert_eq!(signed_keys(pending.get(&hash).unwrap(), 0, &keys), vec![2]);

        let sigs = first.sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &first.public_key(), &sigs),
            SigningOutcome::FullySigned
        );
        assert!(!pending.contains(&hash));
    }

    #[test]
    fn test_signing_twice_is_reported() {
        let signers = signers();
        let federation = federation(&signers);
        let tx = release_tx(&federation, 1);
        let (mut pending, hash) = pending_with(tx.clone());

        let sigs = signers[0].sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &signers[0].public_key(), &sigs),
            SigningOutcome::PartiallySigned
        );
        let after_first = pending.get(&hash).unwrap().clone();

        assert_eq!(
            pending.add_signature(&hash, &signers[0].public_key(), &sigs),
            SigningOutcome::AlreadySigned
        );
        assert_eq!(pending.get(&hash).unwrap(), &after_first);
    }

    #[test]
    fn test_invalid_signature_leaves_tx_untouched() {
        let signers = signers();
        let federation = federation(&signers);
        let tx = release_tx(&federation, 2);
        let (mut pending, hash) = pending_with(tx.clone());

        let mut sigs = signers[0].sign(&tx).unwrap();
        // Signature of input 0 reused for input 1
        sigs[1] = sigs[0].clone();

        assert_eq!(
            pending.add_signature(&hash, &signers[0].public_key(), &sigs),
            SigningOutcome::InvalidSignature { input: 1 }
        );
        assert_eq!(pending.get(&hash).unwrap(), &tx);

        assert_eq!(
            pending.add_signature(&hash, &signers[0].public_key(), &[vec![0x30, 0x00], vec![]]),
            SigningOutcome::InvalidSignature { input: 0 }
        );
    }

    #[test]
    fn test_soft_rejects() {
        let signers = signers();
        let federation = federation(&signers);
        let tx = release_tx(&federation, 2);
        let (mut pending, hash) = pending_with(tx.clone());
        let sigs = signers[0].sign(&tx).unwrap();

        assert_eq!(
            pending.add_signature(&HostTxHash([0u8; 32]), &signers[0].public_key(), &sigs),
            SigningOutcome::NoPendingTransaction
        );
        assert_eq!(
            pending.add_signature(&hash, &signers[0].public_key(), &sigs[..1]),
            SigningOutcome::SignatureCountMismatch {
                expected: 2,
                received: 1
            }
        );
    }

    #[test]
    fn test_outsider_key_is_not_a_federation_key() {
        let signers = signers();
        let federation = federation(&signers);
        let tx = release_tx(&federation, 1);
        let (mut pending, hash) = pending_with(tx.clone());

        let outsider = SingleKeySigner::from_bytes(&[9u8; 32]).unwrap();
        let sigs = outsider.sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &outsider.public_key(), &sigs),
            SigningOutcome::NotAFederationKey { input: 0 }
        );
        assert_eq!(pending.get(&hash).unwrap(), &tx);
    }

    #[test]
    fn test_inputs_of_two_federations_are_signed_by_each() {
        let signers = signers();
        let others: Vec<SingleKeySigner> =
            (4..=6u8).map(|n| SingleKeySigner::from_bytes(&[n; 32]).unwrap()).collect();
        let active = federation(&signers);
        let retiring = federation(&others);

        let mut tx = release_tx(&active, 2);
        tx.input[1].script_sig =
            placeholder_script_sig(&retiring.redeem_script(), retiring.threshold());
        let (mut pending, hash) = pending_with(tx.clone());

        for signer in &signers[..2] {
            let sigs = signer.sign(&tx).unwrap();
            assert_eq!(
                pending.add_signature(&hash, &signer.public_key(), &sigs),
                SigningOutcome::PartiallySigned
            );
        }
        let retiring_keys: Vec<PublicKey> = retiring.btc_public_keys().copied().collect();
        assert!(signed_keys(pending.get(&hash).unwrap(), 1, &retiring_keys).is_empty());

        let sigs = others[0].sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &others[0].public_key(), &sigs),
            SigningOutcome::PartiallySigned
        );
        let sigs = others[1].sign(&tx).unwrap();
        assert_eq!(
            pending.add_signature(&hash, &others[1].public_key(), &sigs),
            SigningOutcome::FullySigned
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let signers = signers();
        let federation = federation(&signers);
        let (pending, _) = pending_with(release_tx(&federation, 1));

        let json = serde_json::to_string(&pending).unwrap();
        let back: PendingSignatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pending);
    }
}
