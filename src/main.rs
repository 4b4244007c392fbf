//! fedpeg-inspect - Bridge State Inspection
//!
//! Reads the persisted bridge state and prints what the federation is
//! currently holding and signing. Never writes to the store.
//!
//! Run modes:
//!   fedpeg-inspect                - Show state summary
//!   fedpeg-inspect config         - Show resolved configuration
//!   fedpeg-inspect pending        - List transactions awaiting signatures
//!   fedpeg-inspect whitelist      - List lock whitelist entries

use fedpeg::common::logging::init_from_config;
use fedpeg::units::format_sats;
use fedpeg::{utxo, BridgeState, FedpegConfig, SqliteStore, WhitelistEntryKind};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let config = match FedpegConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_from_config(&config) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let command = args.get(1).map(String::as_str).unwrap_or("summary");
    if matches!(command, "help" | "--help" | "-h") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if command == "config" {
        config.print_summary();
        return ExitCode::SUCCESS;
    }

    let state = match SqliteStore::new(&config.db_path).and_then(|store| BridgeState::load(&store)) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to load state from {}: {}", config.db_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        "summary" => print_state_summary(&config, &state),
        "pending" => print_pending(&state),
        "whitelist" => print_whitelist(&state),
        _ => {
            print_usage();
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn print_usage() {
    println!("fedpeg-inspect - Bridge State Inspection");
    println!();
    println!("Usage:");
    println!("  fedpeg-inspect [summary]     Show state summary");
    println!("  fedpeg-inspect config        Show resolved configuration");
    println!("  fedpeg-inspect pending       List transactions awaiting signatures");
    println!("  fedpeg-inspect whitelist     List lock whitelist entries");
    println!();
    println!("Environment Variables:");
    println!("  FEDPEG_NETWORK       mainnet | testnet | regtest (default: regtest)");
    println!("  FEDPEG_DB_PATH       SQLite state file (default: fedpeg-state.db)");
    println!("  FEDPEG_LOG_LEVEL     Log level (default: info)");
    println!("  FEDPEG_JSON_LOGS     Set to 1 for JSON logs");
}

fn print_state_summary(config: &FedpegConfig, state: &BridgeState) {
    let c = &config.constants;
    let federations = &state.federations;

    println!("=== Bridge State ===");
    match (&federations.new_federation, &federations.old_federation) {
        (None, _) => println!("Active Federation: genesis"),
        (Some(new), old) => {
            println!(
                "New Federation: {}-of-{} (created at block {})",
                new.threshold(),
                new.size(),
                new.creation_block_number()
            );
            if let Some(old) = old {
                println!("Old Federation: {}-of-{}", old.threshold(), old.size());
            }
            println!(
                "Activates At Block: {}",
                new.creation_block_number() + c.federation_activation_age
            );
        }
    }
    if let Some(pending) = federations.pending() {
        println!("Pending Federation: {} members", pending.size());
    }

    println!(
        "New Federation UTXOs: {} ({})",
        state.utxos.new_federation_utxos.len(),
        format_sats(utxo::total(&state.utxos.new_federation_utxos).to_sat())
    );
    println!(
        "Old Federation UTXOs: {} ({})",
        state.utxos.old_federation_utxos.len(),
        format_sats(state.utxos.total_old().to_sat())
    );
    println!("Release Requests: {}", state.release_requests.len());
    println!("Release Transactions: {}", state.release_transactions.len());
    println!("Pending Signatures: {}", state.pending_signatures.len());
    println!("Processed BTC Transactions: {}", state.processed_txs.len());
    println!("Lock Whitelist Entries: {}", state.lock_whitelist.size());
    println!(
        "Fee Per kB: {}",
        format_sats(state.fee_per_kb.unwrap_or(c.genesis_fee_per_kb).to_sat())
    );
    println!("====================");
}

fn print_pending(state: &BridgeState) {
    if state.pending_signatures.is_empty() {
        println!("No transactions awaiting signatures");
        return;
    }
    for (hash, tx) in state.pending_signatures.iter() {
        println!(
            "{} -> {} ({} inputs, {} outputs)",
            hash,
            tx.compute_txid(),
            tx.input.len(),
            tx.output.len()
        );
    }
}

fn print_whitelist(state: &BridgeState) {
    if let Some(height) = state.lock_whitelist.disable_block_height() {
        println!("Whitelist disabled after BTC block {}", height);
    }
    for (_, entry) in state.lock_whitelist.entries() {
        match &entry.kind {
            WhitelistEntryKind::OneOff {
                max_transfer_value,
                remaining_uses,
            } => println!(
                "{}  one-off  max {}  uses {}",
                entry.address,
                format_sats(max_transfer_value.to_sat()),
                remaining_uses
            ),
            WhitelistEntryKind::Unlimited { remaining_capacity } => println!(
                "{}  unlimited  cap {}",
                entry.address,
                remaining_capacity
                    .map(|cap| format_sats(cap.to_sat()))
                    .unwrap_or_else(|| "none".to_string())
            ),
        }
    }
}
