//! Bridge Support
//!
//! The entry points the host chain calls into. A `BridgeSupport` wraps one
//! invocation: it borrows the loaded [`BridgeState`], the header chain and
//! the host ledger, and records every critical alert raised on the way.
//!
//! ```rust,ignore
//! let alerts = storage::transact(&store, |state| {
//!     let mut bridge = BridgeSupport::new(&constants, state, &mut chain, &mut ledger, block);
//!     bridge.update_collections(&tx)?;
//!     Ok::<_, BridgeError>(bridge.into_alerts())
//! })?;
//! ```
//!
//! Peg-in registration lives in [`crate::pegin`] and funds migration in
//! [`crate::migration`]; both extend this type.

use bitcoin::block::Header;
use bitcoin::{Address, Amount, BlockHash, CompressedPublicKey, PublicKey, Script, ScriptBuf, Txid};
use tracing::{debug, info, warn};

use crate::btc_spv::{BtcChain, MerkleBranch};
use crate::common::logging::{log_alert, log_election_event, log_federation_event, log_release_event};
use crate::common::{Alert, AlertKind, BridgeConstants, BridgeError, Result};
use crate::election::AbiCallSpec;
use crate::federation::{Federation, FederationMember, FederationReference, KeyType};
use crate::host::{ExecutionBlock, HostLedger, HostTransaction, BRIDGE_ADDRESS, BURN_ADDRESS};
use crate::release::{PendingSignatures, ReleaseRequest, ReleaseTransactionBuilder, SigningOutcome};
use crate::storage::BridgeState;
use crate::units::{sats_to_wei, wei_to_sats};
use crate::utxo::{self, Utxo};
use crate::whitelist::{LockWhitelist, LockWhitelistEntry, WhitelistError};

/// Status codes returned to host-chain callers
pub mod codes {
    pub const FEDERATION_CHANGE_GENERIC_ERROR: i32 = -10;

    pub const LOCK_WHITELIST_SUCCESS: i32 = 1;
    pub const LOCK_WHITELIST_ALREADY_EXISTS: i32 = -1;
    pub const LOCK_WHITELIST_NOT_FOUND: i32 = -1;
    pub const LOCK_WHITELIST_DISABLE_ALREADY_SET: i32 = -1;
    pub const LOCK_WHITELIST_INVALID_ADDRESS: i32 = -2;
    pub const LOCK_WHITELIST_INVALID_DELAY: i32 = -2;
    pub const LOCK_WHITELIST_GENERIC_ERROR: i32 = -10;

    pub const FEE_PER_KB_SUCCESS: i32 = 1;
    pub const FEE_PER_KB_VOTE_FAILED: i32 = -1;
    pub const FEE_PER_KB_GENERIC_ERROR: i32 = -10;

    pub const BTC_TX_CONFIRMATIONS_UNKNOWN_BLOCK: i64 = -1;
    pub const BTC_TX_CONFIRMATIONS_NOT_IN_BEST_CHAIN: i64 = -2;
    pub const BTC_TX_CONFIRMATIONS_INCONSISTENT_BLOCK: i64 = -3;
    pub const BTC_TX_CONFIRMATIONS_BLOCK_TOO_OLD: i64 = -4;
    pub const BTC_TX_CONFIRMATIONS_INVALID_MERKLE_BRANCH: i64 = -5;

    /// Deepest block a confirmation query may refer to
    pub const BTC_TX_CONFIRMATIONS_MAX_DEPTH: u32 = 4320;

    pub const BTC_TX_NOT_PROCESSED: i64 = -1;
}

const SET_FEE_PER_KB_FUNCTION: &str = "setFeePerKb";

/// A federation-change call decoded from its vote
#[derive(Debug, Clone, PartialEq, Eq)]
enum FederationChange {
    Create,
    Add(FederationMember),
    Commit([u8; 32]),
    Rollback,
}

impl FederationChange {
    fn parse(spec: &AbiCallSpec) -> Option<Self> {
        let args = &spec.arguments;
        match (spec.function.as_str(), args.len()) {
            ("create", 0) => Some(Self::Create),
            ("add", 1) => parse_key(&args[0]).map(|key| Self::Add(FederationMember::from_single_key(key))),
            ("add-multi", 3) => Some(Self::Add(FederationMember::new(
                parse_key(&args[0])?,
                parse_key(&args[1])?,
                parse_key(&args[2])?,
            ))),
            ("commit", 1) => <[u8; 32]>::try_from(args[0].as_slice()).ok().map(Self::Commit),
            ("rollback", 0) => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// Federator keys are stored compressed whatever encoding the vote used
fn parse_key(bytes: &[u8]) -> Option<PublicKey> {
    PublicKey::from_slice(bytes).ok().map(|key| PublicKey::new(key.inner))
}

/// One invocation of the bridge against loaded state
pub struct BridgeSupport<'a, C: BtcChain, L: HostLedger> {
    /// Consensus parameters
    pub(crate) constants: &'a BridgeConstants,

    /// State loaded for this invocation
    pub(crate) state: &'a mut BridgeState,

    /// Bitcoin header chain
    pub(crate) chain: &'a mut C,

    /// Host-chain balances
    pub(crate) ledger: &'a mut L,

    /// Host block executing the invocation
    pub(crate) block: ExecutionBlock,

    alerts: Vec<Alert>,
}

impl<'a, C: BtcChain, L: HostLedger> BridgeSupport<'a, C, L> {
    pub fn new(
        constants: &'a BridgeConstants,
        state: &'a mut BridgeState,
        chain: &'a mut C,
        ledger: &'a mut L,
        block: ExecutionBlock,
    ) -> Self {
        Self {
            constants,
            state,
            chain,
            ledger,
            block,
            alerts: Vec::new(),
        }
    }

    pub fn constants(&self) -> &BridgeConstants {
        self.constants
    }

    pub fn state(&self) -> &BridgeState {
        &*self.state
    }

    /// Alerts raised so far
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn into_alerts(self) -> Vec<Alert> {
        self.alerts
    }

    pub(crate) fn raise_alert(&mut self, kind: AlertKind, message: impl Into<String>) {
        let alert = Alert::new(kind, message);
        log_alert(&alert);
        self.alerts.push(alert);
    }

    // ========================================================================
    // Federation resolution
    // ========================================================================

    fn active_reference(&self) -> FederationReference {
        self.state
            .federations
            .active_reference(self.constants.federation_activation_age, self.block.number)
    }

    pub fn active_federation(&self) -> &Federation {
        self.state.federations.active(
            &self.constants.genesis_federation,
            self.constants.federation_activation_age,
            self.block.number,
        )
    }

    pub fn retiring_federation(&self) -> Option<&Federation> {
        self.state
            .federations
            .retiring(self.constants.federation_activation_age, self.block.number)
    }

    /// Active federation first, then the retiring one if any
    pub(crate) fn live_federations(&self) -> Vec<&Federation> {
        let mut live = vec![self.active_federation()];
        live.extend(self.retiring_federation());
        live
    }

    pub(crate) fn active_utxos(&self) -> &[Utxo] {
        match self.active_reference() {
            FederationReference::Old => &self.state.utxos.old_federation_utxos,
            _ => &self.state.utxos.new_federation_utxos,
        }
    }

    pub(crate) fn active_utxos_mut(&mut self) -> &mut Vec<Utxo> {
        match self.active_reference() {
            FederationReference::Old => &mut self.state.utxos.old_federation_utxos,
            _ => &mut self.state.utxos.new_federation_utxos,
        }
    }

    /// Fee rate currently voted in, or the genesis one
    pub fn fee_per_kb(&self) -> Amount {
        self.state.fee_per_kb.unwrap_or(self.constants.genesis_fee_per_kb)
    }

    pub(crate) fn describe_script(&self, script: &Script) -> String {
        Address::from_script(script, self.constants.btc_network())
            .map(|address| address.to_string())
            .unwrap_or_else(|_| script.to_hex_string())
    }

    // ========================================================================
    // Headers
    // ========================================================================

    /// Connect headers to the chain, skipping the ones that do not fit
    pub fn receive_headers(&mut self, headers: &[Header]) -> usize {
        match (headers.first(), headers.last()) {
            (Some(first), Some(last)) => debug!(
                count = headers.len(),
                first = %first.block_hash(),
                last = %last.block_hash(),
                "Received headers"
            ),
            _ => warn!("Received 0 headers"),
        }

        let mut added = 0;
        for header in headers {
            match self.chain.add_header(*header) {
                Ok(()) => added += 1,
                Err(e) => warn!(hash = %header.block_hash(), error = %e, "Could not add header"),
            }
        }
        added
    }

    // ========================================================================
    // Releases
    // ========================================================================

    /// Queue a peg-out of the value the sender transferred to the bridge
    pub fn release_btc(&mut self, tx: &HostTransaction) -> Result<()> {
        if tx.from_contract {
            return Err(BridgeError::ContractCaller(tx.sender.to_string()));
        }

        let key = tx
            .sender_public_key
            .ok_or_else(|| BridgeError::illegal_argument("release sender has no public key"))?;

        let value = wei_to_sats(tx.value);
        if value <= self.constants.minimum_release_tx_value {
            log_release_event(
                "release_rejected",
                &tx.hash.to_string(),
                value.to_sat(),
                &tx.sender.to_string(),
                None,
                Some("value not above the minimum release value"),
            );
            return Ok(());
        }

        let destination = ScriptBuf::new_p2pkh(&CompressedPublicKey(key.inner).pubkey_hash());
        log_release_event(
            "release_requested",
            &tx.hash.to_string(),
            value.to_sat(),
            &self.describe_script(&destination),
            None,
            None,
        );
        self.state.release_requests.add(destination, value);
        Ok(())
    }

    /// Periodic tick: migration, then queued releases, then confirmed releases
    pub fn update_collections(&mut self, tx: &HostTransaction) -> Result<()> {
        debug!(host_tx = %tx.hash, block = self.block.number, "Updating collections");

        self.process_funds_migration();
        self.process_release_requests()?;
        self.process_release_transactions(tx);
        Ok(())
    }

    fn process_release_requests(&mut self) -> Result<usize> {
        let max_iterations = self.constants.max_release_iterations;

        let mut queue = std::mem::take(&mut self.state.release_requests);
        let released = queue.process(max_iterations, |request| self.try_release(request));
        self.state.release_requests = queue;

        let released = released?;
        if released > 0 {
            info!(released, pending = self.state.release_requests.len(), "Processed release requests");
        }
        Ok(released)
    }

    /// Build one release; `Ok(false)` keeps the request queued
    fn try_release(&mut self, request: &ReleaseRequest) -> Result<bool> {
        let active = self.active_federation().clone();
        let fee_per_kb = self.fee_per_kb();
        let destination = self.describe_script(&request.destination);

        let built = ReleaseTransactionBuilder::new(
            self.active_utxos(),
            &[&active],
            active.p2sh_script(),
            fee_per_kb,
            self.constants,
        )
        .build_amount_to(&request.destination, request.amount);

        let built = match built {
            Ok(built) => built,
            Err(e) => {
                log_release_event(
                    "release_build_failed",
                    &destination,
                    request.amount.to_sat(),
                    &destination,
                    None,
                    Some(&e.to_string()),
                );
                return Ok(false);
            }
        };

        let txid = built.tx.compute_txid();
        utxo::remove_spent(self.active_utxos_mut(), &built.tx);
        self.state
            .release_transactions
            .add(built.tx.clone(), self.block.number);
        self.burn_unbacked_change(&built.tx, built.total_input(), request.amount)?;

        log_release_event(
            "release_built",
            &txid.to_string(),
            request.amount.to_sat(),
            &destination,
            Some(&txid.to_string()),
            None,
        );
        Ok(true)
    }

    /// Burn what the federation did not actually spend when change was bumped out of dust
    ///
    /// Change is expected at output 1.
    fn burn_unbacked_change(
        &mut self,
        tx: &bitcoin::Transaction,
        total_input: Amount,
        requested: Amount,
    ) -> Result<()> {
        let Some(change) = tx.output.get(1) else {
            return Ok(());
        };

        let spent_by_federation = total_input.checked_sub(change.value).unwrap_or(Amount::ZERO);
        if spent_by_federation < requested {
            let burned = requested - spent_by_federation;
            info!(
                txid = %tx.compute_txid(),
                burned = burned.to_sat(),
                "Burning value not backed by the release"
            );
            self.ledger
                .transfer(&BRIDGE_ADDRESS, &BURN_ADDRESS, sats_to_wei(burned))?;
        }
        Ok(())
    }

    /// Move the oldest confirmed release into the signing set under `tx`
    fn process_release_transactions(&mut self, tx: &HostTransaction) {
        let confirmed = self.state.release_transactions.slice_with_confirmations(
            self.block.number,
            self.constants.host2btc_min_confirmations,
            Some(1),
        );

        if let Some(release) = confirmed.into_iter().next() {
            info!(
                host_tx = %tx.hash,
                txid = %release.compute_txid(),
                "Release transaction waiting for signatures"
            );
            self.state.pending_signatures.insert(tx.hash, release);
        }
    }

    // ========================================================================
    // Signatures
    // ========================================================================

    /// Add a federator's signatures to the release waiting under `hash`
    pub fn add_signature(
        &mut self,
        federator_key: &PublicKey,
        signatures: &[Vec<u8>],
        hash: &crate::host::HostTxHash,
    ) -> Result<SigningOutcome> {
        let known = self
            .live_federations()
            .iter()
            .any(|federation| federation.has_btc_public_key(federator_key));
        if !known {
            warn!(key = %federator_key, %hash, "Signature from a key outside the live federations");
            return Ok(SigningOutcome::UnknownFederator);
        }

        let outcome = self
            .state
            .pending_signatures
            .add_signature(hash, federator_key, signatures);
        debug!(key = %federator_key, %hash, ?outcome, "Signatures submitted");
        Ok(outcome)
    }

    pub fn pending_signatures(&self) -> &PendingSignatures {
        &self.state.pending_signatures
    }

    // ========================================================================
    // Federation change votes
    // ========================================================================

    /// Vote for a federation change, executing it once the quorum is reached
    pub fn vote_federation_change(&mut self, tx: &HostTransaction, spec: &AbiCallSpec) -> i32 {
        let constants = self.constants;
        let authorizer = &constants.federation_change_authorizer;
        let voter = tx.sender.to_string();

        if !authorizer.is_authorized(&tx.sender) {
            log_election_event(&spec.function, &voter, codes::FEDERATION_CHANGE_GENERIC_ERROR);
            return codes::FEDERATION_CHANGE_GENERIC_ERROR;
        }

        let Some(change) = FederationChange::parse(spec) else {
            warn!(%spec, "Unknown or malformed federation change");
            log_election_event(&spec.function, &voter, codes::FEDERATION_CHANGE_GENERIC_ERROR);
            return codes::FEDERATION_CHANGE_GENERIC_ERROR;
        };

        let dry_run = self.execute_federation_change(&change, true);
        if dry_run < 0 {
            log_election_event(&spec.function, &voter, dry_run);
            return dry_run;
        }

        if !self
            .state
            .federation_election
            .vote(spec.clone(), tx.sender, authorizer)
        {
            log_election_event(&spec.function, &voter, codes::FEDERATION_CHANGE_GENERIC_ERROR);
            return codes::FEDERATION_CHANGE_GENERIC_ERROR;
        }

        let Some(winner) = self.state.federation_election.winner(authorizer).cloned() else {
            log_election_event(&spec.function, &voter, dry_run);
            return dry_run;
        };

        let result = match FederationChange::parse(&winner) {
            Some(change) => self.execute_federation_change(&change, false),
            None => codes::FEDERATION_CHANGE_GENERIC_ERROR,
        };
        self.state.federation_election.clear_winners(authorizer);

        if result < 0 {
            self.raise_alert(
                AlertKind::VoteExecutionFailed,
                format!("winning federation change {} failed with {}", winner, result),
            );
        }
        log_election_event(&winner.function, &voter, result);
        result
    }

    fn execute_federation_change(&mut self, change: &FederationChange, dry_run: bool) -> i32 {
        match change {
            FederationChange::Create => self.create_federation(dry_run),
            FederationChange::Add(member) => self.add_federator(member, dry_run),
            FederationChange::Commit(hash) => self.commit_federation(hash, dry_run),
            FederationChange::Rollback => self.rollback_federation(dry_run),
        }
    }

    fn create_federation(&mut self, dry_run: bool) -> i32 {
        if self.state.federations.pending_federation.is_some() {
            return -1;
        }
        if self
            .state
            .federations
            .is_awaiting_activation(self.constants.federation_activation_age, self.block.number)
        {
            return -2;
        }
        if self.retiring_federation().is_some() {
            return -3;
        }
        if dry_run {
            return 1;
        }

        self.state.federations.pending_federation = Some(Default::default());
        self.state.federation_election.clear();
        log_federation_event(
            "pending_federation_created",
            serde_json::json!({ "block": self.block.number }),
        );
        1
    }

    fn add_federator(&mut self, member: &FederationMember, dry_run: bool) -> i32 {
        let Some(pending) = self.state.federations.pending_federation.as_mut() else {
            return -1;
        };
        if pending.conflicts_with(member) {
            return -2;
        }
        if dry_run {
            return 1;
        }

        pending.add_member(member.clone());
        log_federation_event(
            "federator_added",
            serde_json::json!({
                "btc_public_key": member.btc_public_key.to_string(),
                "pending_size": pending.size(),
            }),
        );
        1
    }

    fn commit_federation(&mut self, hash: &[u8; 32], dry_run: bool) -> i32 {
        let Some(pending) = self.state.federations.pending_federation.as_ref() else {
            return -1;
        };
        if !pending.is_complete(self.constants.min_pending_federation_size) {
            return -2;
        }
        if pending.hash() != *hash {
            return -3;
        }

        let federation = match pending.build_federation(
            self.block.timestamp_ms,
            self.block.number,
            self.constants.btc_network(),
        ) {
            Ok(federation) => federation,
            Err(e) => {
                warn!(error = %e, "Pending federation cannot be built");
                return codes::FEDERATION_CHANGE_GENERIC_ERROR;
            }
        };
        if dry_run {
            return 1;
        }

        let active = self.active_federation().clone();

        let dropped = std::mem::take(&mut self.state.utxos.old_federation_utxos);
        if !dropped.is_empty() {
            warn!(
                count = dropped.len(),
                value = utxo::total(&dropped).to_sat(),
                "Dropping UTXOs left in the old slot"
            );
        }
        self.state.utxos.old_federation_utxos =
            std::mem::take(&mut self.state.utxos.new_federation_utxos);

        log_federation_event(
            "federation_committed",
            serde_json::json!({
                "old_redeem_script": active.redeem_script().to_hex_string(),
                "new_redeem_script": federation.redeem_script().to_hex_string(),
                "new_size": federation.size(),
                "block": self.block.number,
            }),
        );

        self.state.federations.old_federation = Some(active);
        self.state.federations.new_federation = Some(federation);
        self.state.federations.pending_federation = None;
        self.state.federation_election.clear();
        1
    }

    fn rollback_federation(&mut self, dry_run: bool) -> i32 {
        if self.state.federations.pending_federation.is_none() {
            return -1;
        }
        if dry_run {
            return 1;
        }

        self.state.federations.pending_federation = None;
        self.state.federation_election.clear();
        log_federation_event(
            "pending_federation_rolled_back",
            serde_json::json!({ "block": self.block.number }),
        );
        1
    }

    // ========================================================================
    // Fee per kb votes
    // ========================================================================

    pub fn vote_fee_per_kb(&mut self, tx: &HostTransaction, fee_per_kb: Amount) -> i32 {
        let constants = self.constants;
        let authorizer = &constants.fee_per_kb_change_authorizer;
        let voter = tx.sender.to_string();

        if !authorizer.is_authorized(&tx.sender)
            || fee_per_kb == Amount::ZERO
            || fee_per_kb > Amount::MAX_MONEY
        {
            log_election_event(SET_FEE_PER_KB_FUNCTION, &voter, codes::FEE_PER_KB_GENERIC_ERROR);
            return codes::FEE_PER_KB_GENERIC_ERROR;
        }

        let spec = AbiCallSpec::new(
            SET_FEE_PER_KB_FUNCTION,
            vec![fee_per_kb.to_sat().to_be_bytes().to_vec()],
        );
        if !self.state.fee_per_kb_election.vote(spec, tx.sender, authorizer) {
            log_election_event(SET_FEE_PER_KB_FUNCTION, &voter, codes::FEE_PER_KB_VOTE_FAILED);
            return codes::FEE_PER_KB_VOTE_FAILED;
        }

        let Some(winner) = self.state.fee_per_kb_election.winner(authorizer) else {
            info!(fee_per_kb = fee_per_kb.to_sat(), "Successful fee per kb vote");
            log_election_event(SET_FEE_PER_KB_FUNCTION, &voter, codes::FEE_PER_KB_SUCCESS);
            return codes::FEE_PER_KB_SUCCESS;
        };

        let winner_fee = winner
            .arguments
            .first()
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(|bytes| Amount::from_sat(u64::from_be_bytes(bytes)));
        let Some(winner_fee) = winner_fee else {
            warn!(%winner, "Winning fee per kb cannot be decoded");
            return codes::FEE_PER_KB_GENERIC_ERROR;
        };

        if winner_fee != fee_per_kb {
            debug!("Winning fee differs from the last vote");
        }

        info!(fee_per_kb = winner_fee.to_sat(), "Fee per kb changed");
        self.state.fee_per_kb = Some(winner_fee);
        self.state.fee_per_kb_election.clear();
        log_election_event(SET_FEE_PER_KB_FUNCTION, &voter, codes::FEE_PER_KB_SUCCESS);
        codes::FEE_PER_KB_SUCCESS
    }

    // ========================================================================
    // Lock whitelist
    // ========================================================================

    fn is_lock_whitelist_change_authorized(&self, tx: &HostTransaction) -> bool {
        self.constants
            .lock_whitelist_change_authorizer
            .is_authorized(&tx.sender)
    }

    /// Whitelist an address for `uses` locks of at most `max_transfer_value` each
    pub fn add_one_off_lock_whitelist_address(
        &mut self,
        tx: &HostTransaction,
        address: &str,
        max_transfer_value: Amount,
        uses: u32,
    ) -> i32 {
        if uses == 0 {
            return codes::LOCK_WHITELIST_GENERIC_ERROR;
        }
        self.add_lock_whitelist_entry(
            tx,
            LockWhitelistEntry::one_off(address, max_transfer_value, uses),
        )
    }

    /// Whitelist an address for any number of locks, optionally capped in total
    pub fn add_unlimited_lock_whitelist_address(
        &mut self,
        tx: &HostTransaction,
        address: &str,
        capacity: Option<Amount>,
    ) -> i32 {
        self.add_lock_whitelist_entry(tx, LockWhitelistEntry::unlimited(address, capacity))
    }

    fn add_lock_whitelist_entry(&mut self, tx: &HostTransaction, entry: LockWhitelistEntry) -> i32 {
        let key = match LockWhitelist::address_key(&entry.address, self.constants.btc_network()) {
            Ok(key) => key,
            Err(e) => {
                warn!(address = %entry.address, error = %e, "Invalid address format");
                return codes::LOCK_WHITELIST_INVALID_ADDRESS;
            }
        };

        if !self.is_lock_whitelist_change_authorized(tx) {
            return codes::LOCK_WHITELIST_GENERIC_ERROR;
        }

        let address = entry.address.clone();
        match self.state.lock_whitelist.put(key, entry) {
            Ok(()) => {
                info!(%address, "Address added to the lock whitelist");
                codes::LOCK_WHITELIST_SUCCESS
            }
            Err(WhitelistError::AlreadyExists(_)) => codes::LOCK_WHITELIST_ALREADY_EXISTS,
            Err(e) => {
                warn!(%address, error = %e, "Unexpected error adding to the lock whitelist");
                codes::LOCK_WHITELIST_GENERIC_ERROR
            }
        }
    }

    pub fn remove_lock_whitelist_address(&mut self, tx: &HostTransaction, address: &str) -> i32 {
        if !self.is_lock_whitelist_change_authorized(tx) {
            return codes::LOCK_WHITELIST_GENERIC_ERROR;
        }

        let key = match LockWhitelist::address_key(address, self.constants.btc_network()) {
            Ok(key) => key,
            Err(_) => return codes::LOCK_WHITELIST_INVALID_ADDRESS,
        };

        match self.state.lock_whitelist.remove(&key) {
            Ok(_) => {
                info!(%address, "Address removed from the lock whitelist");
                codes::LOCK_WHITELIST_SUCCESS
            }
            Err(_) => codes::LOCK_WHITELIST_NOT_FOUND,
        }
    }

    /// Open the whitelist to everyone `delay` blocks past the current best height
    pub fn set_lock_whitelist_disable_block_delay(&mut self, tx: &HostTransaction, delay: i64) -> i32 {
        if !self.is_lock_whitelist_change_authorized(tx) {
            return codes::LOCK_WHITELIST_GENERIC_ERROR;
        }
        if self.state.lock_whitelist.disable_block_height().is_some() {
            return codes::LOCK_WHITELIST_DISABLE_ALREADY_SET;
        }

        let best_height = self.chain.best_height();
        let height = u32::try_from(delay)
            .ok()
            .filter(|delay| *delay > 0)
            .and_then(|delay| best_height.checked_add(delay));
        let Some(height) = height else {
            return codes::LOCK_WHITELIST_INVALID_DELAY;
        };

        match self.state.lock_whitelist.set_disable_block_height(height) {
            Ok(()) => {
                info!(height, "Lock whitelist disable height set");
                codes::LOCK_WHITELIST_SUCCESS
            }
            Err(_) => codes::LOCK_WHITELIST_DISABLE_ALREADY_SET,
        }
    }

    pub fn lock_whitelist_size(&self) -> usize {
        self.state.lock_whitelist.size()
    }

    pub fn lock_whitelist_entry_by_index(&self, index: usize) -> Option<&LockWhitelistEntry> {
        self.state.lock_whitelist.get_by_index(index)
    }

    pub fn lock_whitelist_entry_by_address(&self, address: &str) -> Option<&LockWhitelistEntry> {
        match LockWhitelist::address_key(address, self.constants.btc_network()) {
            Ok(key) => self.state.lock_whitelist.get(&key),
            Err(e) => {
                warn!(%address, error = %e, "Invalid address format");
                None
            }
        }
    }

    pub fn minimum_lock_tx_value(&self) -> Amount {
        self.constants.minimum_lock_tx_value
    }

    // ========================================================================
    // Federation queries
    // ========================================================================

    pub fn federation_address(&self) -> Result<Address> {
        Ok(self.active_federation().address()?)
    }

    pub fn federation_size(&self) -> usize {
        self.active_federation().size()
    }

    pub fn federation_threshold(&self) -> usize {
        self.active_federation().threshold()
    }

    pub fn federation_creation_time_ms(&self) -> u64 {
        self.active_federation().creation_time_ms()
    }

    pub fn federation_creation_block_number(&self) -> u64 {
        self.active_federation().creation_block_number()
    }

    pub fn federator_public_key(&self, index: usize, kind: KeyType) -> Option<PublicKey> {
        self.active_federation().member_public_key(index, kind).copied()
    }

    pub fn retiring_federation_address(&self) -> Result<Option<Address>> {
        Ok(self
            .retiring_federation()
            .map(Federation::address)
            .transpose()?)
    }

    pub fn retiring_federation_size(&self) -> Option<usize> {
        self.retiring_federation().map(Federation::size)
    }

    pub fn retiring_federation_threshold(&self) -> Option<usize> {
        self.retiring_federation().map(Federation::threshold)
    }

    pub fn retiring_federation_creation_time_ms(&self) -> Option<u64> {
        self.retiring_federation().map(Federation::creation_time_ms)
    }

    pub fn retiring_federation_creation_block_number(&self) -> Option<u64> {
        self.retiring_federation()
            .map(Federation::creation_block_number)
    }

    pub fn retiring_federator_public_key(&self, index: usize, kind: KeyType) -> Option<PublicKey> {
        self.retiring_federation()?
            .member_public_key(index, kind)
            .copied()
    }

    pub fn pending_federation_hash(&self) -> Option<[u8; 32]> {
        self.state.federations.pending().map(|pending| pending.hash())
    }

    pub fn pending_federation_size(&self) -> Option<usize> {
        self.state.federations.pending().map(|pending| pending.size())
    }

    pub fn pending_federator_public_key(&self, index: usize, kind: KeyType) -> Option<PublicKey> {
        self.state
            .federations
            .pending()?
            .members()
            .get(index)
            .map(|member| *member.public_key(kind))
    }

    // ========================================================================
    // Bitcoin chain queries
    // ========================================================================

    pub fn btc_best_chain_height(&self) -> u32 {
        self.chain.best_height()
    }

    pub fn btc_initial_chain_height(&self) -> u32 {
        self.chain.initial_height()
    }

    /// Hash of the best-chain block `depth` blocks below the tip
    pub fn btc_block_hash_at_depth(&self, depth: u32) -> Result<BlockHash> {
        let best = self.chain.best_height();
        let max_depth = best.saturating_sub(self.chain.initial_height());
        if depth > max_depth {
            return Err(BridgeError::illegal_argument(format!(
                "depth must be between 0 and {}",
                max_depth
            )));
        }

        self.chain
            .header_at_height(best - depth)
            .map(|header| header.block_hash())
            .ok_or_else(|| BridgeError::internal(format!("no header at height {}", best - depth)))
    }

    /// Confirmations of a transaction proven by a Merkle branch, or a negative code
    pub fn get_btc_transaction_confirmations(
        &self,
        txid: &Txid,
        block_hash: &BlockHash,
        branch: &MerkleBranch,
    ) -> i64 {
        let Some(stored) = self.chain.stored_header(block_hash) else {
            return codes::BTC_TX_CONFIRMATIONS_UNKNOWN_BLOCK;
        };

        let best = self.chain.best_height();
        if best.saturating_sub(stored.height) > codes::BTC_TX_CONFIRMATIONS_MAX_DEPTH {
            return codes::BTC_TX_CONFIRMATIONS_BLOCK_TOO_OLD;
        }
        if stored.height > best {
            return codes::BTC_TX_CONFIRMATIONS_INCONSISTENT_BLOCK;
        }

        match self.chain.header_at_height(stored.height) {
            Some(header) if header.block_hash() == *block_hash => {}
            _ => return codes::BTC_TX_CONFIRMATIONS_NOT_IN_BEST_CHAIN,
        }

        if !branch.proves(txid, &stored.header) {
            return codes::BTC_TX_CONFIRMATIONS_INVALID_MERKLE_BRANCH;
        }

        i64::from(best - stored.height) + 1
    }

    pub fn is_btc_tx_hash_already_processed(&self, txid: &Txid) -> bool {
        self.state.processed_txs.contains_key(txid)
    }

    /// Host block that processed the transaction, or `-1`
    pub fn get_btc_tx_hash_processed_height(&self, txid: &Txid) -> i64 {
        self.state
            .processed_txs
            .get(txid)
            .and_then(|height| i64::try_from(*height).ok())
            .unwrap_or(codes::BTC_TX_NOT_PROCESSED)
    }
}
