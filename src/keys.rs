// Signature engine and key derivation (spec §4.1, §6.4).
//
// The FSM names exactly two cryptographic primitives, `Sign(bytes, key)`
// and `Verify(bytes, sig, pubkey)` (spec §6.4); both are provided by
// `chan_p2p::codec`. This module adds the one thing that's genuinely ours:
// deriving the primary wallet key and the three per-channel keys
// (`KeyIndex`, `KeyIndex+1`, `KeyIndex+2`) from a wallet seed.
//
// Derivation is a SEP-5-style expansion: `HMAC-SHA512(seed, index)` seeds
// an Ed25519 keypair. This is not a full hierarchical-deterministic
// derivation scheme (no chain codes, no hardening) — it is the smallest
// construction that gives every index an independent, reproducible
// keypair, which is all the FSM requires of it.

use chan_p2p::codec::KeyPair;
use chan_p2p::{Message, PublicKeyBytes, SignatureBytes};
use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::Error;

type HmacSha512 = Hmac<Sha512>;

/// Index of the primary wallet key, used to sign message envelopes.
pub const KEY_INDEX_PRIMARY: u32 = 0;

/// Offsets from a channel's base `KeyIndex` for its three channel keys
/// (spec §6.4).
pub const KEY_OFFSET_ESCROW: u32 = 0;
pub const KEY_OFFSET_GUEST: u32 = 1;
pub const KEY_OFFSET_RATCHET: u32 = 2;

/// Derives wallet keys from a seed. `seed` is `None` for a read-only
/// channel view (e.g. while only verifying counterparty signatures);
/// signing with no seed fails with [`Error::NoSeed`].
pub struct KeyVault {
    seed: Option<Vec<u8>>,
}

impl KeyVault {
    pub fn new(seed: Option<Vec<u8>>) -> Self {
        KeyVault { seed }
    }

    pub fn with_seed(seed: Vec<u8>) -> Self {
        KeyVault { seed: Some(seed) }
    }

    pub fn none() -> Self {
        KeyVault { seed: None }
    }

    /// Derives the keypair at absolute index `index` (e.g. `KEY_INDEX_PRIMARY`,
    /// or a channel's `KeyIndex + KEY_OFFSET_*`).
    pub fn derive(&self, index: u32) -> Result<KeyPair, Error> {
        let seed = self.seed.as_ref().ok_or(Error::NoSeed)?;
        let mut mac = HmacSha512::new_from_slice(seed)
            .expect("HMAC accepts keys of any length");
        mac.update(&index.to_be_bytes());
        let expanded = mac.finalize().into_bytes();
        let secret = ed25519_dalek::SecretKey::from_bytes(&expanded[..32])
            .expect("SecretKey::from_bytes only fails on wrong-length input");
        let public = ed25519_dalek::PublicKey::from(&secret);
        Ok(KeyPair(ed25519_dalek::Keypair { secret, public }))
    }

    pub fn primary(&self) -> Result<KeyPair, Error> {
        self.derive(KEY_INDEX_PRIMARY)
    }

    pub fn escrow_key(&self, key_index: u32) -> Result<KeyPair, Error> {
        self.derive(key_index + KEY_OFFSET_ESCROW)
    }

    pub fn guest_key(&self, key_index: u32) -> Result<KeyPair, Error> {
        self.derive(key_index + KEY_OFFSET_GUEST)
    }

    pub fn ratchet_key(&self, key_index: u32) -> Result<KeyPair, Error> {
        self.derive(key_index + KEY_OFFSET_RATCHET)
    }
}

/// Signs `message`'s envelope with the primary wallet key (spec §4.1
/// `signMsg`).
pub fn sign_msg(message: &mut Message, vault: &KeyVault) -> Result<(), Error> {
    let key = vault.primary()?;
    chan_p2p::codec::sign_message(message, &key)?;
    Ok(())
}

/// Verifies `message`'s envelope signature against the sender's primary
/// public key.
pub fn verify_msg(
    message: &Message,
    sender_pubkey: &PublicKeyBytes,
) -> Result<(), Error> {
    chan_p2p::codec::verify_message(message, sender_pubkey)?;
    Ok(())
}

/// Signs arbitrary transaction-payload bytes with `key` (the signature
/// engine's `Sign(bytes, key)` primitive, spec §6.4).
pub fn sign_tx_bytes(bytes: &[u8], key: &KeyPair) -> SignatureBytes {
    key.sign_bytes(bytes)
}

/// Verifies a detached signature over transaction-payload bytes against
/// `pubkey` (the signature engine's `Verify(bytes, sig, pubkey)` primitive).
pub fn verify_tx_bytes(
    bytes: &[u8],
    sig: &SignatureBytes,
    pubkey: &PublicKeyBytes,
    what: &'static str,
) -> Result<(), Error> {
    chan_p2p::codec::verify_bytes(bytes, sig, pubkey, what)?;
    Ok(())
}

/// Recovers the verifying key for a ledger account. On a Stellar-family
/// ledger the account address *is* an Ed25519 public key, so a party's
/// verifying key never needs to be exchanged separately — it is always
/// derivable from `HostAcct`/`GuestAcct`, which every handler already has.
/// Account identifiers here are hex-encoded public keys.
pub fn account_pubkey(account: &str) -> Result<PublicKeyBytes, Error> {
    let bytes = hex::decode(account)
        .map_err(|_| Error::BuildTx(format!("malformed account id: {}", account)))?;
    PublicKeyBytes::from_slice(&bytes).map_err(Error::from)
}
