//! Funds migration from a retiring federation
//!
//! Once a committed federation activates, the previous one keeps custody of
//! its UTXOs until they are swept into the active address. Sweeps start
//! `funds_migration_age_since_activation_begin` blocks after activation and
//! must be finished by `funds_migration_age_since_activation_end`, after
//! which the retiring federation is forgotten.

use bitcoin::Amount;
use tracing::{debug, info};

use crate::bridge::BridgeSupport;
use crate::btc_spv::BtcChain;
use crate::common::logging::log_federation_event;
use crate::common::{AlertKind, Result};
use crate::federation::Federation;
use crate::host::HostLedger;
use crate::release::ReleaseTransactionBuilder;
use crate::utxo;

impl<C: BtcChain, L: HostLedger> BridgeSupport<'_, C, L> {
    pub(crate) fn process_funds_migration(&mut self) {
        let Some(retiring) = self.retiring_federation().cloned() else {
            return;
        };
        let active = self.active_federation().clone();

        let age = self
            .block
            .number
            .saturating_sub(active.creation_block_number());
        let activation_age = self.constants.federation_activation_age;
        let window_begin = activation_age + self.constants.funds_migration_age_since_activation_begin;
        let window_end = activation_age + self.constants.funds_migration_age_since_activation_end;

        let balance = self.state.utxos.total_old();
        let fee_per_kb = self.fee_per_kb();

        if age > window_begin && age < window_end {
            if balance > Amount::from_sat(fee_per_kb.to_sat() / 2) {
                if let Err(e) = self.migrate(&retiring, &active, balance) {
                    self.raise_alert(
                        AlertKind::MigrationFailed,
                        format!("migration of {} to {} failed: {}", balance, active.p2sh_script(), e),
                    );
                }
            } else {
                debug!(age, balance = balance.to_sat(), "Retiring balance too small to migrate");
            }
            return;
        }

        if age >= window_end {
            if balance > Amount::ZERO {
                if let Err(e) = self.migrate(&retiring, &active, balance) {
                    self.raise_alert(
                        AlertKind::MigrationFailed,
                        format!(
                            "final migration of {} failed, {} UTXOs abandoned: {}",
                            balance,
                            self.state.utxos.old_federation_utxos.len(),
                            e
                        ),
                    );
                }
            }

            self.state.federations.old_federation = None;
            self.state.utxos.old_federation_utxos.clear();
            log_federation_event(
                "retiring_federation_cleared",
                serde_json::json!({
                    "redeem_script": retiring.redeem_script().to_hex_string(),
                    "age": age,
                    "block": self.block.number,
                }),
            );
        }
    }

    /// Sweep the retiring UTXOs into the active federation's address
    fn migrate(&mut self, retiring: &Federation, active: &Federation, balance: Amount) -> Result<()> {
        let destination = active.p2sh_script();
        let built = ReleaseTransactionBuilder::new(
            &self.state.utxos.old_federation_utxos,
            &[retiring],
            destination.clone(),
            self.fee_per_kb(),
            self.constants,
        )
        .build_migration(&destination, balance)?;

        let spent = utxo::remove_spent(&mut self.state.utxos.old_federation_utxos, &built.tx);
        let txid = built.tx.compute_txid();
        let moved = built.tx.output.first().map(|out| out.value).unwrap_or(Amount::ZERO);
        self.state
            .release_transactions
            .add(built.tx, self.block.number);

        info!(
            %txid,
            spent,
            moved = moved.to_sat(),
            fee = built.fee.to_sat(),
            "Built funds migration"
        );
        Ok(())
    }
}
