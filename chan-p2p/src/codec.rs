// Canonical byte encoding and detached-signature primitives.
//
// Canonicalization runs every value through `serde_json::Value` first.
// `serde_json`'s default `Value::Object` is a `BTreeMap`, so two messages
// built with fields set in different orders serialize to byte-identical
// output; this is what makes `bytes_to_sign` reproducible across parties
// without either side having to hand-roll a field-ordering convention.

use std::convert::TryFrom;

use ed25519_dalek::Signer;
use serde::Serialize;

use crate::msg::{Message, PublicKeyBytes, SignatureBytes};

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// message bytes could not be decoded into a well-formed `{0}`
    MalformedBytes(&'static str),

    /// signature verification failed for {0}
    SigVerify(&'static str),

    /// canonical encoding failed: {0}
    #[from]
    Encoding(String),
}

/// An Ed25519 keypair used to sign either a message envelope or a
/// transaction payload. Wraps `ed25519_dalek::Keypair` so callers outside
/// this crate never need to depend on it directly.
pub struct KeyPair(pub ed25519_dalek::Keypair);

impl KeyPair {
    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(&self.0.public)
    }

    pub fn sign_bytes(&self, bytes: &[u8]) -> SignatureBytes {
        SignatureBytes::from(&self.0.sign(bytes))
    }
}

/// Serializes `value` through a canonical (field-order-independent) JSON
/// representation.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let as_value = serde_json::to_value(value)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    serde_json::to_vec(&as_value).map_err(|e| Error::Encoding(e.to_string()))
}

/// Returns the bytes a sender must sign to produce `message.signature`:
/// the canonical encoding of `message` with `signature` cleared.
pub fn bytes_to_sign(message: &Message) -> Result<Vec<u8>, Error> {
    let mut unsigned = message.clone();
    unsigned.signature = None;
    canonical_bytes(&unsigned)
}

/// Signs `message` in place with `key`, setting its `signature` field.
pub fn sign_message(message: &mut Message, key: &KeyPair) -> Result<(), Error> {
    let bytes = bytes_to_sign(message)?;
    message.signature = Some(key.sign_bytes(&bytes));
    Ok(())
}

/// Verifies `message.signature` against `pubkey`. Fails if there is no
/// signature to check.
pub fn verify_message(
    message: &Message,
    pubkey: &PublicKeyBytes,
) -> Result<(), Error> {
    let sig = message
        .signature
        .as_ref()
        .ok_or(Error::SigVerify("message envelope"))?;
    verify_bytes(&bytes_to_sign(message)?, sig, pubkey, "message envelope")
}

/// Verifies a detached signature over arbitrary bytes (used both for the
/// message envelope and for transaction payloads).
pub fn verify_bytes(
    bytes: &[u8],
    sig: &SignatureBytes,
    pubkey: &PublicKeyBytes,
    what: &'static str,
) -> Result<(), Error> {
    let pubkey = ed25519_dalek::PublicKey::try_from(pubkey)
        .map_err(|_| Error::MalformedBytes("PublicKeyBytes"))?;
    let sig = ed25519_dalek::Signature::try_from(sig)
        .map_err(|_| Error::MalformedBytes("SignatureBytes"))?;
    pubkey
        .verify_strict(bytes, &sig)
        .map_err(|_| Error::SigVerify(what))
}
