// Message types exchanged between the Host and Guest of a payment channel.
//
// See spec §3.2 and §6.1: a message is `{ChannelID, MsgNum, Version, [one
// of] ...variant, Signature}`, with the signature a detached signature by
// the sender's primary wallet key over the canonical encoding of the
// message with `signature` cleared.

use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The escrow account address, used everywhere as the channel's identity.
pub type ChannelId = String;

/// A ledger account address (host, guest, escrow or ratchet account).
pub type AccountId = String;

/// Non-negative unit amount. Balance invariants are enforced by the FSM, not
/// by this type.
pub type Amount = u64;

/// Seconds since the Unix epoch, as reported by ledger-time observation.
pub type Timestamp = u64;

macro_rules! fixed_bytes {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn from_slice(slice: &[u8]) -> Result<Self, crate::codec::Error> {
                if slice.len() != $len {
                    return Err(crate::codec::Error::MalformedBytes(stringify!($name)));
                }
                let mut buf = [0u8; $len];
                buf.copy_from_slice(slice);
                Ok($name(buf))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0[..]))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&hex::encode(&self.0[..]))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                $name::from_slice(&bytes).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(PublicKeyBytes, 32, "An Ed25519 public key, hex-encoded on the wire.");
fixed_bytes!(SignatureBytes, 64, "A detached Ed25519 signature, hex-encoded on the wire.");

impl TryFrom<&PublicKeyBytes> for ed25519_dalek::PublicKey {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(key: &PublicKeyBytes) -> Result<Self, Self::Error> {
        ed25519_dalek::PublicKey::from_bytes(&key.0)
    }
}

impl From<&ed25519_dalek::PublicKey> for PublicKeyBytes {
    fn from(key: &ed25519_dalek::PublicKey) -> Self {
        PublicKeyBytes(key.to_bytes())
    }
}

impl From<&ed25519_dalek::Signature> for SignatureBytes {
    fn from(sig: &ed25519_dalek::Signature) -> Self {
        SignatureBytes(sig.to_bytes())
    }
}

impl TryFrom<&SignatureBytes> for ed25519_dalek::Signature {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(sig: &SignatureBytes) -> Result<Self, Self::Error> {
        ed25519_dalek::Signature::from_bytes(&sig.0)
    }
}

/// Proposes a new channel. Sent Host -> Guest. `ChannelId` (the message
/// envelope's `channel_id`) carries the escrow account address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelProposeMsg {
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    pub host_amount: Amount,
    pub guest_amount: Amount,
    pub channel_feerate: u64,
    pub max_round_duration_secs: u64,
    pub finality_delay_secs: u64,
    pub base_sequence_number: u64,
    pub funding_time: Timestamp,
}

/// Accepts a proposed channel. Sent Guest -> Host. Carries the Guest's
/// signatures over the round-1 ratchet transaction and the round-1
/// settlement (only `SettleOnlyWithHost` can exist at round 1 if the
/// channel is opened fully funded to the Host).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelAcceptMsg {
    pub ratchet_sig: SignatureBytes,
    pub settle_with_host_sig: SignatureBytes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub settle_with_guest_sig: Option<SignatureBytes>,
}

/// Proposes a payment of `payment_amount` units from sender to recipient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentProposeMsg {
    pub payment_amount: Amount,
    pub payment_time: Timestamp,
    pub round_number: u64,
    pub sender_settle_with_host_sig: SignatureBytes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_settle_with_guest_sig: Option<SignatureBytes>,
}

/// Accepts a proposed payment, returning the recipient's signatures over the
/// round's ratchet transaction and the new settlement pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentAcceptMsg {
    pub recipient_ratchet_sig: SignatureBytes,
    pub recipient_settle_with_host_sig: SignatureBytes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_settle_with_guest_sig: Option<SignatureBytes>,
}

/// Completes a payment round: the sender's signature over the ratchet
/// transaction the recipient already countersigned in `PaymentAcceptMsg`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentCompleteMsg {
    pub sender_ratchet_sig: SignatureBytes,
}

/// Requests (or acknowledges) a cooperative close at current balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CloseMsg {
    pub cooperative_close_sig: SignatureBytes,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    ChannelPropose(ChannelProposeMsg),
    ChannelAccept(ChannelAcceptMsg),
    PaymentPropose(PaymentProposeMsg),
    PaymentAccept(PaymentAcceptMsg),
    PaymentComplete(PaymentCompleteMsg),
    Close(CloseMsg),
}

/// The signed envelope wrapping one of the six message bodies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    pub channel_id: ChannelId,
    pub msg_num: u64,
    pub version: u16,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<SignatureBytes>,
}

impl Message {
    pub fn new(channel_id: ChannelId, msg_num: u64, body: MessageBody) -> Self {
        Message {
            channel_id,
            msg_num,
            version: crate::PROTOCOL_VERSION,
            body,
            signature: None,
        }
    }
}
