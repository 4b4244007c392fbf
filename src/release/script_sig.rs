//! P2SH multisig scriptSig helpers
//!
//! Release inputs carry `OP_0 <slot_1> ... <slot_m> <redeem script>`, where
//! an empty slot is a signature still missing.

use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{PublicKey, Script, ScriptBuf, Transaction};

/// Bytes reserved per missing signature when estimating sizes
pub const SIGNATURE_SIZE_ESTIMATE: usize = 72;

/// Unsigned scriptSig with `threshold` empty slots
pub fn placeholder_script_sig(redeem_script: &Script, threshold: usize) -> ScriptBuf {
    let mut chunks = vec![Vec::new(); threshold + 1];
    chunks.push(redeem_script.to_bytes());
    // Empty chunks and a redeem script well under 4 GB always fit a push
    build_script_sig(&chunks).unwrap_or_default()
}

/// Data pushes of a scriptSig; `None` if it contains anything but pushes
pub fn chunks(script_sig: &Script) -> Option<Vec<Vec<u8>>> {
    script_sig
        .instructions()
        .map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
            _ => None,
        })
        .collect()
}

/// Serialize chunks back into a scriptSig, empty chunks as `OP_0`
pub fn build_script_sig(chunks: &[Vec<u8>]) -> Option<ScriptBuf> {
    let mut builder = Builder::new();
    for chunk in chunks {
        let push = PushBytesBuf::try_from(chunk.clone()).ok()?;
        builder = builder.push_slice(push);
    }
    Some(builder.into_script())
}

/// Redeem script carried as the last push of a scriptSig
pub fn redeem_script(script_sig: &Script) -> Option<ScriptBuf> {
    chunks(script_sig)?.pop().map(ScriptBuf::from_bytes)
}

/// Public keys of a multisig redeem script, in script order
pub fn redeem_script_keys(redeem_script: &Script) -> Vec<PublicKey> {
    redeem_script
        .instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => PublicKey::from_slice(bytes.as_bytes()).ok(),
            _ => None,
        })
        .collect()
}

/// Legacy `SIGHASH_ALL` digest of an input spending `redeem_script`
pub fn legacy_sighash(tx: &Transaction, input: usize, redeem_script: &Script) -> Option<Message> {
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(input, redeem_script, EcdsaSighashType::All.to_u32())
        .ok()?;
    Some(Message::from_digest(sighash.to_byte_array()))
}

/// Whether every input has its signature slots filled
pub fn is_fully_signed(tx: &Transaction) -> bool {
    tx.input.iter().all(|input| match chunks(&input.script_sig) {
        Some(chunks) if chunks.len() >= 2 => chunks[1..chunks.len() - 1].iter().all(|c| !c.is_empty()),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_layout() {
        let redeem = ScriptBuf::from_bytes(vec![0x52, 0x53, 0xae]);
        let script_sig = placeholder_script_sig(&redeem, 2);

        // OP_0 OP_0 OP_0 <push3 redeem>
        assert_eq!(script_sig.as_bytes(), &[0x00, 0x00, 0x00, 0x03, 0x52, 0x53, 0xae]);

        let parsed = chunks(&script_sig).unwrap();
        assert_eq!(parsed.len(), 4);
        assert!(parsed[..3].iter().all(Vec::is_empty));
        assert_eq!(redeem_script(&script_sig).unwrap(), redeem);
    }

    #[test]
    fn test_chunks_rejects_opcodes() {
        let script = Builder::new()
            .push_opcode(bitcoin::opcodes::all::OP_CHECKSIG)
            .into_script();
        assert!(chunks(&script).is_none());
    }

    #[test]
    fn test_rebuild_roundtrip() {
        let original = vec![vec![], vec![0x30, 0x01], vec![], vec![0xaa; 80]];
        let script = build_script_sig(&original).unwrap();
        assert_eq!(chunks(&script).unwrap(), original);
    }
}
