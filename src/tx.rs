// Transaction-role registry (spec §4.9).
//
// Transaction *construction* for the underlying ledger is out of scope: the
// real implementation plugs in a ledger-specific library that turns a
// `Channel` snapshot into signable transaction bytes. This module fixes
// only the semantic roles those builders must fill, behind the
// [`TxBuilders`] trait, plus a deterministic [`NullTxBuilders`] test double
// so the FSM can be exercised without linking a ledger SDK.

use serde::Serialize;

use crate::channel::Channel;
use crate::error::Error;

/// Names the ledger transactions the protocol binds (spec §4.9 table).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display(Debug)]
pub enum TxRole {
    /// Transfers the Host's funds into escrow; consumes the Host primary
    /// account's sequence number.
    FundingTx,
    /// Creates the host-ratchet, guest-ratchet and escrow accounts.
    SetupAccountTx,
    /// Time-locked tx bumping the escrow sequence via a ratchet account;
    /// enables publication of the matching round's settlement.
    RatchetTx,
    /// Settlement transaction paying the Host's share when both sides have
    /// a nonzero balance.
    SettleWithHostTx,
    /// Settlement transaction paying the Guest's share when both sides have
    /// a nonzero balance.
    SettleWithGuestTx,
    /// The sole settlement transaction when `GuestAmount = 0`.
    SettleOnlyWithHostTx,
    /// Single-tx cooperative dissolution; requires both signatures.
    CooperativeCloseTx,
    /// Adds funds to escrow mid-channel.
    TopUpTx,
    /// Tears down ratchet/escrow accounts after a failed setup.
    CleanupTx,
}

/// An unsigned transaction payload: the bytes a signer must sign.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsignedTx {
    pub role: TxRole,
    pub bytes: Vec<u8>,
}

/// A transaction payload plus the detached signatures collected for it so
/// far, in signer order.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedTx {
    pub role: TxRole,
    pub bytes: Vec<u8>,
    pub sigs: Vec<chan_p2p::SignatureBytes>,
}

impl SignedTx {
    pub fn new(unsigned: UnsignedTx, sigs: Vec<chan_p2p::SignatureBytes>) -> Self {
        SignedTx {
            role: unsigned.role,
            bytes: unsigned.bytes,
            sigs,
        }
    }
}

/// Opaque, pure-function builders over a [`Channel`] snapshot. A concrete
/// implementation wraps the ledger's actual transaction-construction
/// library; the FSM only ever touches their output as bytes-to-sign.
pub trait TxBuilders {
    fn funding_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn setup_account_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn ratchet_tx(
        &self,
        ch: &Channel,
        ratchet_acct: &str,
        seqnum: u64,
    ) -> Result<UnsignedTx, Error>;
    fn settle_with_host_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn settle_with_guest_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn settle_only_with_host_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn cooperative_close_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
    fn top_up_tx(&self, ch: &Channel, amount: u64) -> Result<UnsignedTx, Error>;
    fn cleanup_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error>;
}

/// Deterministic fields of a `Channel` snapshot relevant to settlement and
/// ratchet transactions. Kept separate from `Channel` itself so the bytes a
/// builder produces depend only on what actually changes the ledger
/// outcome, not on bookkeeping fields like `last_msg_index`.
#[derive(Serialize)]
struct SnapshotDigest<'a> {
    escrow_acct: &'a str,
    host_acct: &'a str,
    guest_acct: &'a str,
    host_amount: u64,
    guest_amount: u64,
    round_number: u64,
    base_sequence_number: u64,
    finality_delay: u64,
}

impl<'a> SnapshotDigest<'a> {
    fn of(ch: &'a Channel) -> Self {
        SnapshotDigest {
            escrow_acct: &ch.escrow_acct,
            host_acct: &ch.host_acct,
            guest_acct: &ch.guest_acct,
            host_amount: ch.host_amount,
            guest_amount: ch.guest_amount,
            round_number: ch.round_number,
            base_sequence_number: ch.base_sequence_number,
            finality_delay: ch.finality_delay,
        }
    }
}

#[derive(Serialize)]
struct TaggedDigest<'a> {
    role: &'static str,
    snapshot: SnapshotDigest<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ratchet_acct: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ratchet_seqnum: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_up_amount: Option<u64>,
}

fn digest_bytes(
    role: TxRole,
    ch: &Channel,
    ratchet_acct: Option<&str>,
    ratchet_seqnum: Option<u64>,
    top_up_amount: Option<u64>,
) -> Result<Vec<u8>, Error> {
    let tagged = TaggedDigest {
        role: match role {
            TxRole::FundingTx => "funding",
            TxRole::SetupAccountTx => "setup_account",
            TxRole::RatchetTx => "ratchet",
            TxRole::SettleWithHostTx => "settle_with_host",
            TxRole::SettleWithGuestTx => "settle_with_guest",
            TxRole::SettleOnlyWithHostTx => "settle_only_with_host",
            TxRole::CooperativeCloseTx => "cooperative_close",
            TxRole::TopUpTx => "top_up",
            TxRole::CleanupTx => "cleanup",
        },
        snapshot: SnapshotDigest::of(ch),
        ratchet_acct,
        ratchet_seqnum,
        top_up_amount,
    };
    chan_p2p::codec::canonical_bytes(&tagged)
        .map_err(|e| Error::BuildTx(e.to_string()))
}

/// A test/placeholder implementation of [`TxBuilders`] that produces
/// deterministic canonical-JSON digests instead of real ledger
/// transactions. Two parties building from the same channel snapshot
/// always get byte-identical output, which is all the FSM's
/// "copy channel, apply hypothetically, build, verify" pattern (spec §9)
/// requires of a builder.
pub struct NullTxBuilders;

impl TxBuilders for NullTxBuilders {
    fn funding_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::FundingTx,
            bytes: digest_bytes(TxRole::FundingTx, ch, None, None, None)?,
        })
    }

    fn setup_account_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::SetupAccountTx,
            bytes: digest_bytes(TxRole::SetupAccountTx, ch, None, None, None)?,
        })
    }

    fn ratchet_tx(
        &self,
        ch: &Channel,
        ratchet_acct: &str,
        seqnum: u64,
    ) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::RatchetTx,
            bytes: digest_bytes(
                TxRole::RatchetTx,
                ch,
                Some(ratchet_acct),
                Some(seqnum),
                None,
            )?,
        })
    }

    fn settle_with_host_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::SettleWithHostTx,
            bytes: digest_bytes(TxRole::SettleWithHostTx, ch, None, None, None)?,
        })
    }

    fn settle_with_guest_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::SettleWithGuestTx,
            bytes: digest_bytes(TxRole::SettleWithGuestTx, ch, None, None, None)?,
        })
    }

    fn settle_only_with_host_tx(
        &self,
        ch: &Channel,
    ) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::SettleOnlyWithHostTx,
            bytes: digest_bytes(
                TxRole::SettleOnlyWithHostTx,
                ch,
                None,
                None,
                None,
            )?,
        })
    }

    fn cooperative_close_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::CooperativeCloseTx,
            bytes: digest_bytes(
                TxRole::CooperativeCloseTx,
                ch,
                None,
                None,
                None,
            )?,
        })
    }

    fn top_up_tx(&self, ch: &Channel, amount: u64) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::TopUpTx,
            bytes: digest_bytes(TxRole::TopUpTx, ch, None, None, Some(amount))?,
        })
    }

    fn cleanup_tx(&self, ch: &Channel) -> Result<UnsignedTx, Error> {
        Ok(UnsignedTx {
            role: TxRole::CleanupTx,
            bytes: digest_bytes(TxRole::CleanupTx, ch, None, None, None)?,
        })
    }
}
