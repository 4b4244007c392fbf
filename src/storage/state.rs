//! Bridge state aggregate and its persisted layout
//!
//! Every field lives under its own key as a versioned JSON envelope:
//! `{"version": 1, "data": ...}`.

use bitcoin::{Amount, Txid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::traits::{BatchEntry, BridgeStore, StorageError, StorageResult};
use crate::election::AbiCallElection;
use crate::federation::{Federation, FederationRegistry, PendingFederation};
use crate::release::{PendingSignatures, ReleaseRequestQueue, ReleaseTransactionSet};
use crate::utxo::{Utxo, UtxoLedger};
use crate::whitelist::LockWhitelist;

pub const STATE_VERSION: u32 = 1;

pub mod keys {
    pub const NEW_FEDERATION: &str = "new_federation";
    pub const OLD_FEDERATION: &str = "old_federation";
    pub const PENDING_FEDERATION: &str = "pending_federation";
    pub const NEW_FEDERATION_UTXOS: &str = "new_federation_utxos";
    pub const OLD_FEDERATION_UTXOS: &str = "old_federation_utxos";
    pub const RELEASE_REQUEST_QUEUE: &str = "release_request_queue";
    pub const RELEASE_TRANSACTION_SET: &str = "release_transaction_set";
    pub const PENDING_SIGNATURES: &str = "pending_signatures";
    pub const PROCESSED_TXS: &str = "processed_txs";
    pub const LOCK_WHITELIST: &str = "lock_whitelist";
    pub const FEE_PER_KB: &str = "fee_per_kb";
    pub const FEDERATION_ELECTION: &str = "federation_election";
    pub const FEE_PER_KB_ELECTION: &str = "fee_per_kb_election";
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Everything the bridge core reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeState {
    pub federations: FederationRegistry,
    pub utxos: UtxoLedger,
    pub release_requests: ReleaseRequestQueue,
    pub release_transactions: ReleaseTransactionSet,
    pub pending_signatures: PendingSignatures,
    /// Bitcoin transactions already acted on, with the host block that did it
    pub processed_txs: BTreeMap<Txid, u64>,
    pub lock_whitelist: LockWhitelist,
    pub fee_per_kb: Option<Amount>,
    pub federation_election: AbiCallElection,
    pub fee_per_kb_election: AbiCallElection,
}

fn encode<T: Serialize>(key: &str, value: &T) -> StorageResult<String> {
    serde_json::to_string(&EnvelopeRef {
        version: STATE_VERSION,
        data: value,
    })
    .map_err(|e| StorageError::InvalidData(format!("{}: {}", key, e)))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StorageResult<T> {
    let envelope: Envelope<T> = serde_json::from_str(raw)
        .map_err(|e| StorageError::InvalidData(format!("{}: {}", key, e)))?;

    if envelope.version != STATE_VERSION {
        return Err(StorageError::InvalidData(format!(
            "{}: unsupported version {}",
            key, envelope.version
        )));
    }
    Ok(envelope.data)
}

fn load_or_default<T: DeserializeOwned + Default>(store: &impl BridgeStore, key: &str) -> StorageResult<T> {
    match store.get(key)? {
        Some(raw) => decode(key, &raw),
        None => Ok(T::default()),
    }
}

fn load_optional<T: DeserializeOwned>(store: &impl BridgeStore, key: &str) -> StorageResult<Option<T>> {
    store.get(key)?.map(|raw| decode(key, &raw)).transpose()
}

fn put<T: Serialize>(batch: &mut Vec<BatchEntry>, key: &str, value: &T) -> StorageResult<()> {
    batch.push((key.to_string(), Some(encode(key, value)?)));
    Ok(())
}

fn put_optional<T: Serialize>(
    batch: &mut Vec<BatchEntry>,
    key: &str,
    value: Option<&T>,
) -> StorageResult<()> {
    match value {
        Some(value) => put(batch, key, value),
        None => {
            batch.push((key.to_string(), None));
            Ok(())
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Sats(#[serde(with = "bitcoin::amount::serde::as_sat")] Amount);

impl BridgeState {
    /// Read the whole state; absent keys start empty
    pub fn load(store: &impl BridgeStore) -> StorageResult<Self> {
        let federations = FederationRegistry {
            new_federation: load_optional::<Federation>(store, keys::NEW_FEDERATION)?,
            old_federation: load_optional::<Federation>(store, keys::OLD_FEDERATION)?,
            pending_federation: load_optional::<PendingFederation>(store, keys::PENDING_FEDERATION)?,
        };

        let utxos = UtxoLedger {
            new_federation_utxos: load_or_default::<Vec<Utxo>>(store, keys::NEW_FEDERATION_UTXOS)?,
            old_federation_utxos: load_or_default::<Vec<Utxo>>(store, keys::OLD_FEDERATION_UTXOS)?,
        };

        Ok(Self {
            federations,
            utxos,
            release_requests: load_or_default(store, keys::RELEASE_REQUEST_QUEUE)?,
            release_transactions: load_or_default(store, keys::RELEASE_TRANSACTION_SET)?,
            pending_signatures: load_or_default(store, keys::PENDING_SIGNATURES)?,
            processed_txs: load_or_default(store, keys::PROCESSED_TXS)?,
            lock_whitelist: load_or_default(store, keys::LOCK_WHITELIST)?,
            fee_per_kb: load_optional::<Sats>(store, keys::FEE_PER_KB)?.map(|Sats(fee)| fee),
            federation_election: load_or_default(store, keys::FEDERATION_ELECTION)?,
            fee_per_kb_election: load_or_default(store, keys::FEE_PER_KB_ELECTION)?,
        })
    }

    /// Encode every field as one batch
    pub fn to_batch(&self) -> StorageResult<Vec<BatchEntry>> {
        let mut batch = Vec::with_capacity(13);

        put_optional(&mut batch, keys::NEW_FEDERATION, self.federations.new_federation.as_ref())?;
        put_optional(&mut batch, keys::OLD_FEDERATION, self.federations.old_federation.as_ref())?;
        put_optional(
            &mut batch,
            keys::PENDING_FEDERATION,
            self.federations.pending_federation.as_ref(),
        )?;
        put(&mut batch, keys::NEW_FEDERATION_UTXOS, &self.utxos.new_federation_utxos)?;
        put(&mut batch, keys::OLD_FEDERATION_UTXOS, &self.utxos.old_federation_utxos)?;
        put(&mut batch, keys::RELEASE_REQUEST_QUEUE, &self.release_requests)?;
        put(&mut batch, keys::RELEASE_TRANSACTION_SET, &self.release_transactions)?;
        put(&mut batch, keys::PENDING_SIGNATURES, &self.pending_signatures)?;
        put(&mut batch, keys::PROCESSED_TXS, &self.processed_txs)?;
        put(&mut batch, keys::LOCK_WHITELIST, &self.lock_whitelist)?;
        put_optional(&mut batch, keys::FEE_PER_KB, self.fee_per_kb.map(Sats).as_ref())?;
        put(&mut batch, keys::FEDERATION_ELECTION, &self.federation_election)?;
        put(&mut batch, keys::FEE_PER_KB_ELECTION, &self.fee_per_kb_election)?;

        Ok(batch)
    }

    /// Flush the whole state atomically
    pub fn save(&self, store: &impl BridgeStore) -> StorageResult<()> {
        let batch = self.to_batch()?;
        debug!(entries = batch.len(), "Flushing bridge state");
        store.write_batch(&batch)
    }
}

/// Run `operation` against freshly loaded state, persisting only on success
pub fn transact<S, T, E>(store: &S, operation: impl FnOnce(&mut BridgeState) -> Result<T, E>) -> Result<T, E>
where
    S: BridgeStore,
    E: From<StorageError>,
{
    let mut state = BridgeState::load(store)?;
    let output = operation(&mut state)?;
    state.save(store)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_empty_store_loads_default() {
        let store = MemoryStore::new();
        assert_eq!(BridgeState::load(&store).unwrap(), BridgeState::default());
    }

    #[test]
    fn test_roundtrip() {
        let store = MemoryStore::new();
        let mut state = BridgeState::default();
        state.processed_txs.insert(Txid::from_byte_array([3u8; 32]), 77);
        state.fee_per_kb = Some(Amount::from_sat(20_000));
        state.federations.pending_federation = Some(PendingFederation::new());

        state.save(&store).unwrap();
        assert_eq!(BridgeState::load(&store).unwrap(), state);

        let raw = store.get(keys::FEE_PER_KB).unwrap().unwrap();
        assert_eq!(raw, r#"{"version":1,"data":20000}"#);
    }

    #[test]
    fn test_cleared_optional_deletes_key() {
        let store = MemoryStore::new();
        let mut state = BridgeState {
            fee_per_kb: Some(Amount::from_sat(1)),
            ..Default::default()
        };
        state.save(&store).unwrap();

        state.fee_per_kb = None;
        state.save(&store).unwrap();
        assert_eq!(store.get(keys::FEE_PER_KB).unwrap(), None);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let store = MemoryStore::new();
        store
            .write_batch(&[(keys::PROCESSED_TXS.to_string(), Some(r#"{"version":2,"data":{}}"#.to_string()))])
            .unwrap();

        assert!(matches!(
            BridgeState::load(&store),
            Err(StorageError::InvalidData(_))
        ));
    }

    #[test]
    fn test_transact_discards_failed_operations() {
        let store = MemoryStore::new();

        let result: Result<(), StorageError> = transact(&store, |state| {
            state.fee_per_kb = Some(Amount::from_sat(5));
            Err(StorageError::InvalidData("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(store.is_empty());

        transact::<_, _, StorageError>(&store, |state| {
            state.fee_per_kb = Some(Amount::from_sat(5));
            Ok(())
        })
        .unwrap();
        assert_eq!(BridgeState::load(&store).unwrap().fee_per_kb, Some(Amount::from_sat(5)));
    }
}
