//! Public-key to address derivation
//!
//! Derives testnet P2PKH addresses from raw public keys found in
//! transaction unlocking scripts. The derivation is the standard
//! hash160 + base58check chain and must stay bit-exact.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Version byte prepended to the public-key hash for testnet P2PKH addresses.
pub const TESTNET_P2PKH_PREFIX: u8 = 0x6f;

/// Derive a base58check testnet address from a raw public key.
///
/// Works for both compressed (33-byte) and uncompressed (65-byte) keys:
/// SHA-256, then RIPEMD-160, then version prefix, then a 4-byte
/// double-SHA-256 checksum, base58-encoded.
pub fn pubkey_to_address(pubkey: &[u8]) -> String {
    let sha = Sha256::digest(pubkey);
    let hash160 = Ripemd160::digest(sha);

    let mut payload = Vec::with_capacity(25);
    payload.push(TESTNET_P2PKH_PREFIX);
    payload.extend_from_slice(&hash160);

    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);

    bs58::encode(payload).into_string()
}

/// Resolve the spender address embedded in an unlocking script.
///
/// For P2PKH-style single-signature inputs the script's "asm" form is
/// `<signature> <pubkey>`; the last whitespace token is taken as the hex
/// public key. Returns `None` when the script is empty or the token is
/// not valid hex -- callers treat that as "address unknown", never as a
/// failure.
pub fn address_from_unlocking_script(asm: &str) -> Option<String> {
    let pubkey_hex = asm.split_whitespace().last()?;
    let pubkey = hex::decode(pubkey_hex).ok()?;
    if pubkey.is_empty() {
        return None;
    }
    Some(pubkey_to_address(&pubkey))
}
