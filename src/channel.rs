// The per-channel record (spec §3.1) and its finite-state-machine stages
// (spec §4.2).

use chan_p2p::{AccountId, ChannelId};

use crate::tx::{SignedTx, TxRole};

/// Which side of the channel we are. The Host funds and initiates; the
/// Guest responds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(Debug)]
pub enum Role {
    Host,
    Guest,
}

/// Channel lifecycle: the states of the channel FSM (spec §4.2).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(Debug)]
#[repr(u8)]
pub enum Lifecycle {
    Start = 0,
    SettingUp = 1,
    ChannelProposed = 2,
    AwaitingFunding = 3,
    AwaitingCleanup = 4,
    Funded = 5,
    Open = 6,
    PaymentProposed = 7,
    PaymentAccepted = 8,
    AwaitingPaymentMerge = 9,
    AwaitingClose = 10,
    AwaitingSettlementMintime = 11,
    AwaitingSettlement = 12,
    Closed = 13,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Start
    }
}

/// A pending (not yet finalized) payment round. Normally only one of
/// `sent`/`received` is populated; both are populated while merging a
/// collision (spec §4.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PendingPayment {
    pub amount_sent: u64,
    pub amount_received: u64,
    pub time: u64,
}

/// The per-channel record. Exclusively owned by the [`crate::updater::Updater`]
/// for the duration of one transition (spec §5).
#[derive(Clone, Debug)]
pub struct Channel {
    // Identity & role
    pub id: ChannelId,
    pub role: Role,
    /// Base index this channel's escrow/guest/ratchet keys are derived
    /// from (`KeyIndex`, `KeyIndex+1`, `KeyIndex+2`; spec §6.4).
    pub key_index: u32,
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub escrow_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,

    // Economic state
    pub host_amount: u64,
    pub guest_amount: u64,
    pub channel_feerate: u64,

    // Protocol timing
    pub max_round_duration: u64,
    pub finality_delay: u64,
    pub funding_time: u64,
    pub payment_time: u64,
    pub pending_payment_time: u64,

    // Sequence / round
    pub base_sequence_number: u64,
    pub round_number: u64,
    pub host_ratchet_acct_seqnum: u64,
    pub guest_ratchet_acct_seqnum: u64,
    pub funding_tx_seqnum: u64,

    // Pending payment
    pub pending: PendingPayment,

    // Stored signatures / transactions
    pub current_settle_with_guest_tx: Option<SignedTx>,
    pub current_settle_with_host_tx: Option<SignedTx>,
    pub counterparty_latest_settle_with_guest_tx: Option<SignedTx>,
    pub counterparty_latest_settle_with_host_tx: Option<SignedTx>,
    pub current_ratchet_tx: Option<SignedTx>,
    pub counterparty_coop_close_sig: Option<chan_p2p::SignatureBytes>,
    pub coop_close_tx: Option<SignedTx>,

    // Messaging
    pub last_msg_index: u64,
    pub passphrase: String,
    pub counterparty_address: String,

    // FSM state
    pub stage: Lifecycle,

    // Top-up bookkeeping (spec §4.10, supplemented)
    pub top_ups_observed: u64,
}

impl Channel {
    /// Allocates the next outbound `MsgNum`, advancing `last_msg_index`
    /// (spec §3.1 invariant: `MsgNum = LastMsgIndex + 1` at emission time).
    pub fn next_msg_num(&mut self) -> u64 {
        self.last_msg_index += 1;
        self.last_msg_index
    }

    /// The escrow balance: sum of both sides' amounts, invariant across
    /// every committed transition except while a payment is in flight
    /// (spec §3.1 invariant).
    pub fn escrow_balance(&self) -> u64 {
        self.host_amount + self.guest_amount
    }

    pub fn counterparty_balance(&self) -> u64 {
        match self.role {
            Role::Host => self.guest_amount,
            Role::Guest => self.host_amount,
        }
    }

    /// Our own share of the escrow balance — the most we can propose to
    /// send in a payment.
    pub fn own_balance(&self) -> u64 {
        match self.role {
            Role::Host => self.host_amount,
            Role::Guest => self.guest_amount,
        }
    }

    pub fn require_stage(
        &self,
        expected: &'static [Lifecycle],
    ) -> Result<(), crate::error::Error> {
        if expected.iter().any(|s| *s == self.stage) {
            Ok(())
        } else {
            Err(crate::error::Error::unexpected(self.stage, expected))
        }
    }

    /// Applies a confirmed `TopUpTx`: only valid in `Open` (spec §4.10).
    pub fn record_top_up(
        &mut self,
        side: Role,
        amount: u64,
    ) -> Result<(), crate::error::Error> {
        self.require_stage(&[Lifecycle::Open])?;
        match side {
            Role::Host => self.host_amount += amount,
            Role::Guest => self.guest_amount += amount,
        }
        self.top_ups_observed += 1;
        Ok(())
    }

    /// Role-relative verifying key role used to check a signature produced
    /// by `role` over a transaction of type `tx_role`: the Host always
    /// signs with the escrow key, the Guest with its own account key.
    pub fn signer_acct(&self, role: Role) -> &str {
        match role {
            Role::Host => &self.host_acct,
            Role::Guest => &self.guest_acct,
        }
    }

    pub fn other(&self) -> Role {
        match self.role {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

/// Marker so settlement-pair builders know which half of the pair they are
/// dealing with; re-exported alongside [`TxRole`] for callers composing a
/// full settlement.
pub const SETTLEMENT_ROLES: [TxRole; 2] =
    [TxRole::SettleWithHostTx, TxRole::SettleWithGuestTx];
