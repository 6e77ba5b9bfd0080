// The FSM transition engine (spec §4, §9).
//
// `InputEvent` is the polymorphism-over-message-kinds pattern from the
// design notes: one tagged enum, one exhaustive dispatch. Every handler
// follows the same shape the teacher's `update_from_peer` dispatch used —
// validate fully (including all signature verification) before mutating
// anything, so a rejected event never leaves the channel half-updated
// (spec §5, §7 propagation policy).

use chan_p2p::{
    ChannelAcceptMsg, ChannelId, ChannelProposeMsg, CloseMsg, Message,
    MessageBody, PaymentAcceptMsg, PaymentCompleteMsg, PaymentProposeMsg,
    SignatureBytes,
};

use crate::apply::apply_payment;
use crate::channel::{Channel, Lifecycle, Role};
use crate::error::Error;
use crate::keys::{self, KeyVault};
use crate::output::{OutputSink, TransactionEnvelope};
use crate::policy::ChannelConfig;
use crate::tx::{SignedTx, TxBuilders};

/// Parameters for a local `CreateChannel` command (Host only). Not named
/// explicitly in the wire protocol — these are exactly the fields a Host
/// needs on hand before it can emit the three setup-account transactions.
pub struct CreateChannelParams {
    pub guest_acct: chan_p2p::AccountId,
    pub host_acct: chan_p2p::AccountId,
    pub host_ratchet_acct: chan_p2p::AccountId,
    pub guest_ratchet_acct: chan_p2p::AccountId,
    pub escrow_acct: chan_p2p::AccountId,
    pub host_amount: u64,
    pub guest_amount: u64,
    pub channel_feerate: u64,
    pub max_round_duration: u64,
    pub finality_delay: u64,
    pub base_sequence_number: u64,
    pub key_index: u32,
    pub passphrase: String,
    pub counterparty_address: String,
}

pub enum TimerKind {
    RoundTimer,
}

/// The three kinds of ledger facts the driver turns into events (spec
/// §6.3).
pub enum LedgerEvent {
    SetupAccountsConfirmed,
    FundingConfirmed,
    CoopCloseConfirmed,
    SettlementMintimeElapsed,
    SettlementConfirmed,
    TopUpConfirmed { side: Role, amount: u64 },
}

pub enum LocalCommand {
    CreateChannel(Box<CreateChannelParams>),
    ProposePayment { amount: u64, time: u64 },
    Close,
    AbandonSetup,
}

/// One input to the FSM (spec §9 design note).
pub enum InputEvent {
    InboundMsg(Message),
    TimerFired(TimerKind),
    LedgerObserved(LedgerEvent),
    LocalCommand(LocalCommand),
}

/// Owns a channel and its output sink for the duration of one transition
/// (spec §5: the `Channel` record is exclusively owned by the updater for
/// that duration).
pub struct Updater<'a, B: TxBuilders> {
    pub ch: &'a mut Channel,
    pub keys: &'a KeyVault,
    pub builders: &'a B,
    pub config: &'a ChannelConfig,
    pub sink: &'a mut OutputSink,
}

impl<'a, B: TxBuilders> Updater<'a, B> {
    /// Dispatches one event to its handler (spec §9 "exhaustive match").
    pub fn dispatch(&mut self, event: InputEvent, now: u64) -> Result<(), Error> {
        match event {
            InputEvent::InboundMsg(msg) => self.dispatch_msg(msg, now),
            InputEvent::TimerFired(TimerKind::RoundTimer) => {
                self.handle_round_timeout()
            }
            InputEvent::LedgerObserved(ev) => self.dispatch_ledger(ev),
            InputEvent::LocalCommand(cmd) => self.dispatch_command(cmd, now),
        }
    }

    fn dispatch_msg(&mut self, msg: Message, now: u64) -> Result<(), Error> {
        if msg.version != chan_p2p::PROTOCOL_VERSION {
            log::debug!(
                "dropping message with protocol version {} (expected {})",
                msg.version,
                chan_p2p::PROTOCOL_VERSION
            );
            return Ok(());
        }
        match msg.body {
            MessageBody::ChannelPropose(propose) => {
                self.handle_channel_propose(msg.channel_id, propose)
            }
            MessageBody::ChannelAccept(accept) => self.handle_channel_accept(accept),
            MessageBody::PaymentPropose(propose) => {
                self.handle_payment_propose(propose, now)
            }
            MessageBody::PaymentAccept(accept) => self.handle_payment_accept(accept),
            MessageBody::PaymentComplete(complete) => {
                self.handle_payment_complete(complete)
            }
            MessageBody::Close(close) => self.handle_close(close),
        }
    }

    fn dispatch_ledger(&mut self, ev: LedgerEvent) -> Result<(), Error> {
        match ev {
            LedgerEvent::SetupAccountsConfirmed => self.handle_setup_confirmed(),
            LedgerEvent::FundingConfirmed => self.handle_funding_confirmed(),
            LedgerEvent::CoopCloseConfirmed => self.handle_coop_close_confirmed(),
            LedgerEvent::SettlementMintimeElapsed => self.handle_mintime_elapsed(),
            LedgerEvent::SettlementConfirmed => self.handle_settlement_confirmed(),
            LedgerEvent::TopUpConfirmed { side, amount } => {
                self.ch.record_top_up(side, amount)
            }
        }
    }

    fn dispatch_command(&mut self, cmd: LocalCommand, now: u64) -> Result<(), Error> {
        match cmd {
            LocalCommand::CreateChannel(params) => self.handle_create_channel(*params),
            LocalCommand::ProposePayment { amount, time } => {
                self.handle_propose_payment(amount, time.max(now))
            }
            LocalCommand::Close => self.propose_close(),
            LocalCommand::AbandonSetup => self.handle_abandon_setup(),
        }
    }

    // -- key/signature helpers -------------------------------------------

    fn own_settlement_key(&self) -> Result<chan_p2p::codec::KeyPair, Error> {
        match self.ch.role {
            Role::Host => self.keys.escrow_key(self.ch.key_index),
            Role::Guest => self.keys.guest_key(self.ch.key_index),
        }
    }

    fn settlement_key_for(&self, role: Role) -> Result<chan_p2p::codec::KeyPair, Error> {
        match role {
            Role::Host => self.keys.escrow_key(self.ch.key_index),
            Role::Guest => self.keys.guest_key(self.ch.key_index),
        }
    }

    fn own_ratchet_key(&self) -> Result<chan_p2p::codec::KeyPair, Error> {
        self.keys.ratchet_key(self.ch.key_index)
    }

    fn verifying_key_for(&self, role: Role) -> Result<chan_p2p::PublicKeyBytes, Error> {
        keys::account_pubkey(self.ch.signer_acct(role))
    }

    /// Builds and verifies the settlement tx(es) a counterparty claims to
    /// have signed over `snapshot`, returning the per-role signatures in
    /// `(host_sig, guest_sig)` order so callers can assemble the final
    /// pair. `sender_role` is whichever side produced `host_sig`/`guest_sig`
    /// — always the same party, since settlement txs require one signature
    /// share per role regardless of who is proposing or accepting.
    fn verify_settlement_sigs(
        &self,
        snapshot: &Channel,
        sender_role: Role,
        with_host_sig: &SignatureBytes,
        with_guest_sig: Option<&SignatureBytes>,
    ) -> Result<(), Error> {
        let sender_pubkey = self.verifying_key_for(sender_role)?;
        if snapshot.guest_amount == 0 {
            if with_guest_sig.is_some() {
                return Err(Error::UnusedSettleWithGuestSig);
            }
            let unsigned = self.builders.settle_only_with_host_tx(snapshot)?;
            keys::verify_tx_bytes(
                &unsigned.bytes,
                with_host_sig,
                &sender_pubkey,
                "settle_only_with_host",
            )
        } else {
            let host_unsigned = self.builders.settle_with_host_tx(snapshot)?;
            keys::verify_tx_bytes(
                &host_unsigned.bytes,
                with_host_sig,
                &sender_pubkey,
                "settle_with_host",
            )?;
            let guest_sig = with_guest_sig.ok_or(Error::UnusedSettleWithGuestSig)?;
            let guest_unsigned = self.builders.settle_with_guest_tx(snapshot)?;
            keys::verify_tx_bytes(
                &guest_unsigned.bytes,
                guest_sig,
                &sender_pubkey,
                "settle_with_guest",
            )
        }
    }

    /// Signs the settlement tx(es) for `snapshot` with our own key, for
    /// inclusion in an outbound propose/accept message.
    fn sign_settlement(
        &self,
        snapshot: &Channel,
    ) -> Result<(SignatureBytes, Option<SignatureBytes>), Error> {
        let key = self.own_settlement_key()?;
        if snapshot.guest_amount == 0 {
            let unsigned = self.builders.settle_only_with_host_tx(snapshot)?;
            Ok((keys::sign_tx_bytes(&unsigned.bytes, &key), None))
        } else {
            let host_unsigned = self.builders.settle_with_host_tx(snapshot)?;
            let guest_unsigned = self.builders.settle_with_guest_tx(snapshot)?;
            Ok((
                keys::sign_tx_bytes(&host_unsigned.bytes, &key),
                Some(keys::sign_tx_bytes(&guest_unsigned.bytes, &key)),
            ))
        }
    }

    /// Assembles the final 2-of-2 settlement pair for `snapshot`, combining
    /// `sender_role`'s verified signatures with a freshly (deterministic)
    /// recomputed signature from the other side.
    fn finalize_settlement(
        &self,
        snapshot: &Channel,
        sender_role: Role,
        sender_with_host_sig: SignatureBytes,
        sender_with_guest_sig: Option<SignatureBytes>,
    ) -> Result<(SignedTx, Option<SignedTx>), Error> {
        let other_key = self.settlement_key_for(sender_role.opposite())?;
        let host_unsigned = if snapshot.guest_amount == 0 {
            self.builders.settle_only_with_host_tx(snapshot)?
        } else {
            self.builders.settle_with_host_tx(snapshot)?
        };
        let other_host_sig = keys::sign_tx_bytes(&host_unsigned.bytes, &other_key);
        let (host_sig, guest_sig_for_host_tx) = order_by_role(
            sender_role,
            sender_with_host_sig,
            other_host_sig,
        );
        let with_host = SignedTx::new(host_unsigned, vec![host_sig, guest_sig_for_host_tx]);

        let with_guest = if snapshot.guest_amount == 0 {
            None
        } else {
            let guest_unsigned = self.builders.settle_with_guest_tx(snapshot)?;
            let sender_guest_sig = sender_with_guest_sig
                .ok_or(Error::UnusedSettleWithGuestSig)?;
            let other_guest_sig = keys::sign_tx_bytes(&guest_unsigned.bytes, &other_key);
            let (host_sig, guest_sig) =
                order_by_role(sender_role, sender_guest_sig, other_guest_sig);
            Some(SignedTx::new(guest_unsigned, vec![host_sig, guest_sig]))
        };

        Ok((with_host, with_guest))
    }

    // -- setup / funding --------------------------------------------------

    pub fn handle_create_channel(
        &mut self,
        params: CreateChannelParams,
    ) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::Start])?;
        if self.ch.role != Role::Host {
            return Err(Error::unexpected(self.ch.stage, &[Lifecycle::Start]));
        }
        self.ch.host_acct = params.host_acct;
        self.ch.guest_acct = params.guest_acct;
        self.ch.escrow_acct = params.escrow_acct.clone();
        self.ch.id = params.escrow_acct;
        self.ch.host_ratchet_acct = params.host_ratchet_acct;
        self.ch.guest_ratchet_acct = params.guest_ratchet_acct;
        self.ch.host_amount = params.host_amount;
        self.ch.guest_amount = params.guest_amount;
        self.ch.channel_feerate = params.channel_feerate;
        self.ch.max_round_duration = params.max_round_duration;
        self.ch.finality_delay = params.finality_delay;
        self.ch.base_sequence_number = params.base_sequence_number;
        self.ch.key_index = params.key_index;
        self.ch.passphrase = params.passphrase;
        self.ch.counterparty_address = params.counterparty_address;
        self.ch.stage = Lifecycle::SettingUp;

        let unsigned = self.builders.setup_account_tx(self.ch)?;
        let key = self.keys.primary()?;
        let sig = keys::sign_tx_bytes(&unsigned.bytes, &key);
        self.sink
            .emit_tx(TransactionEnvelope::Single(SignedTx::new(unsigned, vec![sig])));
        log::debug!("channel {}: Start -> SettingUp", self.ch.id);
        Ok(())
    }

    pub fn handle_setup_confirmed(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::SettingUp])?;
        self.ch.stage = Lifecycle::ChannelProposed;

        let propose = ChannelProposeMsg {
            host_acct: self.ch.host_acct.clone(),
            guest_acct: self.ch.guest_acct.clone(),
            host_ratchet_acct: self.ch.host_ratchet_acct.clone(),
            guest_ratchet_acct: self.ch.guest_ratchet_acct.clone(),
            host_amount: self.ch.host_amount,
            guest_amount: self.ch.guest_amount,
            channel_feerate: self.ch.channel_feerate,
            max_round_duration_secs: self.ch.max_round_duration,
            finality_delay_secs: self.ch.finality_delay,
            base_sequence_number: self.ch.base_sequence_number,
            funding_time: self.ch.funding_time,
        };
        self.emit_msg(MessageBody::ChannelPropose(propose))?;

        let unsigned = self.builders.funding_tx(self.ch)?;
        let key = self.keys.primary()?;
        let sig = keys::sign_tx_bytes(&unsigned.bytes, &key);
        self.sink
            .emit_tx(TransactionEnvelope::Single(SignedTx::new(unsigned, vec![sig])));
        log::debug!("channel {}: SettingUp -> ChannelProposed", self.ch.id);
        Ok(())
    }

    pub fn handle_abandon_setup(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::SettingUp])?;
        let unsigned = self.builders.cleanup_tx(self.ch)?;
        let key = self.keys.primary()?;
        let sig = keys::sign_tx_bytes(&unsigned.bytes, &key);
        self.sink
            .emit_tx(TransactionEnvelope::Single(SignedTx::new(unsigned, vec![sig])));
        self.ch.stage = Lifecycle::Start;
        log::debug!("channel {}: SettingUp -> Start (setup abandoned)", self.ch.id);
        Ok(())
    }

    pub fn handle_channel_propose(
        &mut self,
        channel_id: ChannelId,
        propose: ChannelProposeMsg,
    ) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::Start])?;
        if self.ch.role != Role::Guest {
            return Err(Error::unexpected(self.ch.stage, &[Lifecycle::Start]));
        }
        if propose.guest_acct != self.ch.guest_acct {
            log::debug!(
                "dropping ChannelProposeMsg addressed to a different guest account"
            );
            return Ok(());
        }
        self.config.validate_propose(&propose)?;

        self.ch.id = channel_id;
        self.ch.host_acct = propose.host_acct;
        self.ch.host_ratchet_acct = propose.host_ratchet_acct;
        self.ch.guest_ratchet_acct = propose.guest_ratchet_acct;
        self.ch.host_amount = propose.host_amount;
        self.ch.guest_amount = propose.guest_amount;
        self.ch.channel_feerate = propose.channel_feerate;
        self.ch.max_round_duration = propose.max_round_duration_secs;
        self.ch.finality_delay = propose.finality_delay_secs;
        self.ch.base_sequence_number = propose.base_sequence_number;
        self.ch.funding_time = propose.funding_time;
        self.ch.payment_time = propose.funding_time;
        self.ch.round_number = 1;
        self.ch.role = Role::Guest;
        self.ch.stage = Lifecycle::AwaitingFunding;

        let ratchet_key = self.own_ratchet_key()?;
        let ratchet_unsigned = self.builders.ratchet_tx(
            self.ch,
            &self.ch.guest_ratchet_acct.clone(),
            self.ch.guest_ratchet_acct_seqnum,
        )?;
        let ratchet_sig = keys::sign_tx_bytes(&ratchet_unsigned.bytes, &ratchet_key);
        let (settle_with_host_sig, settle_with_guest_sig) =
            self.sign_settlement(self.ch)?;

        let accept = ChannelAcceptMsg {
            ratchet_sig,
            settle_with_host_sig,
            settle_with_guest_sig,
        };
        self.emit_msg(MessageBody::ChannelAccept(accept))?;
        log::debug!("channel {}: Start -> AwaitingFunding", self.ch.id);
        Ok(())
    }

    pub fn handle_channel_accept(&mut self, accept: ChannelAcceptMsg) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::ChannelProposed])?;
        let guest_pubkey = self.verifying_key_for(Role::Guest)?;

        let ratchet_unsigned = self.builders.ratchet_tx(
            self.ch,
            &self.ch.guest_ratchet_acct.clone(),
            self.ch.guest_ratchet_acct_seqnum,
        )?;
        keys::verify_tx_bytes(
            &ratchet_unsigned.bytes,
            &accept.ratchet_sig,
            &guest_pubkey,
            "round-1 ratchet",
        )?;

        self.verify_settlement_sigs(
            self.ch,
            Role::Guest,
            &accept.settle_with_host_sig,
            accept.settle_with_guest_sig.as_ref(),
        )?;

        let own_ratchet_key = self.own_ratchet_key()?;
        let own_ratchet_sig = keys::sign_tx_bytes(&ratchet_unsigned.bytes, &own_ratchet_key);
        let (host_sig, guest_sig) =
            order_by_role(Role::Guest, accept.ratchet_sig, own_ratchet_sig);
        self.ch.current_ratchet_tx =
            Some(SignedTx::new(ratchet_unsigned, vec![host_sig, guest_sig]));

        let (with_host, with_guest) = self.finalize_settlement(
            self.ch,
            Role::Guest,
            accept.settle_with_host_sig,
            accept.settle_with_guest_sig,
        )?;
        self.ch.current_settle_with_host_tx = Some(with_host);
        self.ch.current_settle_with_guest_tx = with_guest;

        self.ch.stage = Lifecycle::AwaitingFunding;
        log::debug!("channel {}: ChannelProposed -> AwaitingFunding", self.ch.id);
        Ok(())
    }

    pub fn handle_funding_confirmed(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::AwaitingFunding])?;
        self.ch.stage = Lifecycle::Open;
        log::debug!("channel {}: AwaitingFunding -> Open", self.ch.id);
        Ok(())
    }

    // -- payments -----------------------------------------------------

    pub fn handle_propose_payment(&mut self, amount: u64, time: u64) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::Open])?;
        if amount > self.ch.own_balance() {
            return Err(Error::InsufficientOwnBalance {
                amount,
                balance: self.ch.own_balance(),
            });
        }

        let mut ch2 = apply_payment(self.ch, self.ch.role, amount);
        ch2.round_number = self.ch.round_number + 1;
        let (sender_settle_with_host_sig, sender_settle_with_guest_sig) =
            self.sign_settlement(&ch2)?;

        self.ch.pending.amount_sent = amount;
        self.ch.pending.time = time;
        self.ch.pending_payment_time = time;
        self.ch.stage = Lifecycle::PaymentProposed;

        let propose = PaymentProposeMsg {
            payment_amount: amount,
            payment_time: time,
            round_number: ch2.round_number,
            sender_settle_with_host_sig,
            sender_settle_with_guest_sig,
        };
        self.emit_msg(MessageBody::PaymentPropose(propose))?;
        self.sink
            .arm_round_timer(self.ch.pending_payment_time + self.ch.max_round_duration);
        log::debug!("channel {}: Open -> PaymentProposed", self.ch.id);
        Ok(())
    }

    pub fn handle_payment_propose(
        &mut self,
        msg: PaymentProposeMsg,
        ledger_time: u64,
    ) -> Result<(), Error> {
        match self.ch.stage {
            Lifecycle::Open | Lifecycle::PaymentProposed | Lifecycle::AwaitingPaymentMerge => {}
            other => {
                return Err(Error::unexpected(
                    other,
                    &[
                        Lifecycle::Open,
                        Lifecycle::PaymentProposed,
                        Lifecycle::AwaitingPaymentMerge,
                    ],
                ))
            }
        }

        if msg.payment_amount > self.ch.counterparty_balance() {
            log::debug!("dropping PaymentProposeMsg exceeding counterparty balance");
            return Ok(());
        }

        let round_increment = matches!(
            self.ch.stage,
            Lifecycle::Open | Lifecycle::AwaitingPaymentMerge
        );
        let is_merge = matches!(self.ch.stage, Lifecycle::AwaitingPaymentMerge);
        if is_merge {
            // We lost an earlier collision (spec §4.4): our own
            // `pending.amount_sent` and the winner's original gross
            // `pending.amount_received` are both already on record, and the
            // winner's net resend must equal their difference.
            let expected =
                self.ch.pending.amount_received as i128 - self.ch.pending.amount_sent as i128;
            if expected < 0 || msg.payment_amount as i128 != expected {
                log::debug!(
                    "dropping merge PaymentProposeMsg with mismatched net amount \
                     (got {}, expected {})",
                    msg.payment_amount,
                    expected
                );
                return Ok(());
            }
        }
        if round_increment {
            if msg.round_number < self.ch.round_number {
                log::debug!("dropping stale PaymentProposeMsg (round {})", msg.round_number);
                return Ok(());
            }
            let time_delta = (ledger_time as i128 - self.ch.payment_time as i128).abs();
            if time_delta > self.ch.max_round_duration as i128 {
                log::debug!("dropping PaymentProposeMsg outside the round window");
                return Ok(());
            }
            if msg.payment_time < self.ch.payment_time {
                log::debug!("dropping PaymentProposeMsg with stale payment_time");
                return Ok(());
            }
        }

        // A proposer always signs its settlement against round_number + 1
        // relative to its own last committed round, whether this is a
        // fresh proposal or a losing side's original (now collided) one —
        // so verification here always uses the same basis, regardless of
        // which branch we resolve into below.
        let sender_role = self.ch.other();
        let mut ch2 = apply_payment(self.ch, sender_role, msg.payment_amount);
        ch2.round_number = self.ch.round_number + 1;
        self.verify_settlement_sigs(
            &ch2,
            sender_role,
            &msg.sender_settle_with_host_sig,
            msg.sender_settle_with_guest_sig.as_ref(),
        )?;

        if round_increment {
            let own_ratchet_acct = self.ch.signer_ratchet_acct();
            let own_ratchet_seqnum = self.ch.own_ratchet_seqnum() + 1;
            let ratchet_unsigned =
                self.builders.ratchet_tx(&ch2, &own_ratchet_acct, own_ratchet_seqnum)?;
            let own_ratchet_key = self.own_ratchet_key()?;
            let recipient_ratchet_sig =
                keys::sign_tx_bytes(&ratchet_unsigned.bytes, &own_ratchet_key);
            let (recipient_settle_with_host_sig, recipient_settle_with_guest_sig) =
                self.sign_settlement(&ch2)?;

            self.ch.counterparty_latest_settle_with_host_tx = Some(SignedTx::new(
                self.builders.settle_with_host_tx(&ch2).or_else(|_| {
                    self.builders.settle_only_with_host_tx(&ch2)
                })?,
                vec![msg.sender_settle_with_host_sig],
            ));
            self.ch.counterparty_latest_settle_with_guest_tx =
                msg.sender_settle_with_guest_sig.map(|sig| {
                    SignedTx::new(
                        self.builders
                            .settle_with_guest_tx(&ch2)
                            .expect("guest settlement already verified to build"),
                        vec![sig],
                    )
                });

            if !is_merge {
                // Fresh proposal: record the gross amount and time we're
                // accepting. A merge keeps the gross `pending` fields
                // already on record from the original collision so the
                // eventual `PaymentComplete` delta nets to the same value
                // the winner actually signed.
                self.ch.pending.amount_received = msg.payment_amount;
                self.ch.pending.time = msg.payment_time;
            }
            self.ch.pending_payment_time = msg.payment_time;
            self.ch.round_number = ch2.round_number;
            self.ch.stage = Lifecycle::PaymentAccepted;

            let accept = PaymentAcceptMsg {
                recipient_ratchet_sig,
                recipient_settle_with_host_sig,
                recipient_settle_with_guest_sig,
            };
            self.emit_msg(MessageBody::PaymentAccept(accept))?;
            log::debug!(
                "channel {}: {:?} -> PaymentAccepted",
                self.ch.id,
                self.ch.stage
            );
            return Ok(());
        }

        // Collision: both sides proposed concurrently while we were
        // PaymentProposed (spec §4.4).
        let we_win = self.ch.pending.amount_sent > msg.payment_amount
            || (self.ch.pending.amount_sent == msg.payment_amount
                && self.ch.role == Role::Host);
        if we_win {
            self.ch.pending.amount_sent -= msg.payment_amount;

            // Same round target as our original proposal: a losing
            // counter-proposal never consumes a round number, so the
            // resend still settles at round_number + 1 and both sides
            // commit to the same value once it's accepted.
            let mut net = apply_payment(self.ch, self.ch.role, self.ch.pending.amount_sent);
            net.round_number = self.ch.round_number + 1;
            let (sender_settle_with_host_sig, sender_settle_with_guest_sig) =
                self.sign_settlement(&net)?;
            let propose = PaymentProposeMsg {
                payment_amount: self.ch.pending.amount_sent,
                payment_time: self.ch.pending.time,
                round_number: net.round_number,
                sender_settle_with_host_sig,
                sender_settle_with_guest_sig,
            };
            self.emit_msg(MessageBody::PaymentPropose(propose))?;
            log::debug!(
                "channel {}: PaymentProposed collision, we win, net {}",
                self.ch.id,
                self.ch.pending.amount_sent
            );
        } else {
            self.ch.pending.amount_received = msg.payment_amount;
            self.ch.stage = Lifecycle::AwaitingPaymentMerge;
            log::debug!(
                "channel {}: PaymentProposed -> AwaitingPaymentMerge (collision, we lose)",
                self.ch.id
            );
        }
        Ok(())
    }

    pub fn handle_payment_accept(&mut self, msg: PaymentAcceptMsg) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::PaymentProposed])?;

        let amount = self.ch.pending.amount_sent;
        let our_role = self.ch.role;
        match our_role {
            Role::Host => {
                self.ch.host_amount -= amount;
                self.ch.guest_amount += amount;
            }
            Role::Guest => {
                self.ch.guest_amount -= amount;
                self.ch.host_amount += amount;
            }
        }

        let recipient_role = self.ch.other();
        let new_round = self.ch.round_number + 1;
        let mut snapshot = self.ch.clone();
        snapshot.round_number = new_round;

        let recipient_ratchet_acct = match recipient_role {
            Role::Host => self.ch.host_ratchet_acct.clone(),
            Role::Guest => self.ch.guest_ratchet_acct.clone(),
        };
        let recipient_ratchet_seqnum = match recipient_role {
            Role::Host => self.ch.host_ratchet_acct_seqnum + 1,
            Role::Guest => self.ch.guest_ratchet_acct_seqnum + 1,
        };
        let ratchet_unsigned =
            self.builders
                .ratchet_tx(&snapshot, &recipient_ratchet_acct, recipient_ratchet_seqnum)?;
        let recipient_pubkey = self.verifying_key_for(recipient_role)?;
        keys::verify_tx_bytes(
            &ratchet_unsigned.bytes,
            &msg.recipient_ratchet_sig,
            &recipient_pubkey,
            "round ratchet",
        )?;

        self.verify_settlement_sigs(
            &snapshot,
            recipient_role,
            &msg.recipient_settle_with_host_sig,
            msg.recipient_settle_with_guest_sig.as_ref(),
        )?;

        let own_key = self.settlement_key_for(our_role)?;
        let own_ratchet_sig = keys::sign_tx_bytes(&ratchet_unsigned.bytes, &own_key);
        let (host_sig, guest_sig) =
            order_by_role(recipient_role, msg.recipient_ratchet_sig, own_ratchet_sig);
        self.ch.current_ratchet_tx =
            Some(SignedTx::new(ratchet_unsigned, vec![host_sig, guest_sig]));

        let (with_host, with_guest) = self.finalize_settlement(
            &snapshot,
            recipient_role,
            msg.recipient_settle_with_host_sig,
            msg.recipient_settle_with_guest_sig,
        )?;
        self.ch.current_settle_with_host_tx = Some(with_host.clone());
        self.ch.current_settle_with_guest_tx = with_guest;

        match recipient_role {
            Role::Host => self.ch.host_ratchet_acct_seqnum = recipient_ratchet_seqnum,
            Role::Guest => self.ch.guest_ratchet_acct_seqnum = recipient_ratchet_seqnum,
        }
        self.ch.round_number = new_round;
        self.ch.payment_time = self.ch.pending.time;
        self.ch.pending = Default::default();
        self.ch.stage = Lifecycle::Open;

        let sender_key = self.own_ratchet_key()?;
        let sender_ratchet_sig =
            keys::sign_tx_bytes(&with_host.bytes, &sender_key);
        let complete = PaymentCompleteMsg { sender_ratchet_sig };
        self.emit_msg(MessageBody::PaymentComplete(complete))?;
        self.sink.cancel_round_timer();
        log::debug!("channel {}: PaymentProposed -> Open", self.ch.id);
        Ok(())
    }

    pub fn handle_payment_complete(&mut self, msg: PaymentCompleteMsg) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::PaymentAccepted])?;

        let delta =
            self.ch.pending.amount_received as i128 - self.ch.pending.amount_sent as i128;
        match self.ch.role {
            Role::Guest => {
                self.ch.guest_amount = (self.ch.guest_amount as i128 + delta) as u64;
                self.ch.host_amount = (self.ch.host_amount as i128 - delta) as u64;
            }
            Role::Host => {
                self.ch.host_amount = (self.ch.host_amount as i128 + delta) as u64;
                self.ch.guest_amount = (self.ch.guest_amount as i128 - delta) as u64;
            }
        }

        let sender_role = self.ch.other();
        let own_ratchet_acct = self.ch.signer_ratchet_acct();
        let own_ratchet_seqnum = self.ch.own_ratchet_seqnum();
        let ratchet_unsigned =
            self.builders.ratchet_tx(self.ch, &own_ratchet_acct, own_ratchet_seqnum)?;
        let sender_pubkey = self.verifying_key_for(sender_role)?;
        keys::verify_tx_bytes(
            &ratchet_unsigned.bytes,
            &msg.sender_ratchet_sig,
            &sender_pubkey,
            "round ratchet (complete)",
        )?;

        let own_ratchet_key = self.own_ratchet_key()?;
        let own_ratchet_sig = keys::sign_tx_bytes(&ratchet_unsigned.bytes, &own_ratchet_key);
        let (host_sig, guest_sig) =
            order_by_role(sender_role, msg.sender_ratchet_sig, own_ratchet_sig);
        self.ch.current_ratchet_tx =
            Some(SignedTx::new(ratchet_unsigned, vec![host_sig, guest_sig]));

        if let Some(latest_host) = self.ch.counterparty_latest_settle_with_host_tx.take() {
            let own_key = self.own_settlement_key()?;
            let own_sig = keys::sign_tx_bytes(&latest_host.bytes, &own_key);
            let sender_sig = latest_host.sigs[0];
            let (host_sig, guest_sig) = order_by_role(sender_role, sender_sig, own_sig);
            self.ch.current_settle_with_host_tx = Some(SignedTx::new(
                crate::tx::UnsignedTx {
                    role: latest_host.role,
                    bytes: latest_host.bytes,
                },
                vec![host_sig, guest_sig],
            ));
        }
        if let Some(latest_guest) = self.ch.counterparty_latest_settle_with_guest_tx.take() {
            let own_key = self.own_settlement_key()?;
            let own_sig = keys::sign_tx_bytes(&latest_guest.bytes, &own_key);
            let sender_sig = latest_guest.sigs[0];
            let (host_sig, guest_sig) = order_by_role(sender_role, sender_sig, own_sig);
            self.ch.current_settle_with_guest_tx = Some(SignedTx::new(
                crate::tx::UnsignedTx {
                    role: latest_guest.role,
                    bytes: latest_guest.bytes,
                },
                vec![host_sig, guest_sig],
            ));
        }

        self.ch.payment_time = self.ch.pending.time;
        self.ch.pending = Default::default();
        self.ch.stage = Lifecycle::Open;
        self.sink.cancel_round_timer();
        log::debug!("channel {}: PaymentAccepted -> Open", self.ch.id);
        Ok(())
    }

    // -- close ----------------------------------------------------------

    pub fn propose_close(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::Open])?;
        let unsigned = self.builders.cooperative_close_tx(self.ch)?;
        let key = self.own_settlement_key()?;
        let sig = keys::sign_tx_bytes(&unsigned.bytes, &key);
        self.ch.stage = Lifecycle::AwaitingClose;
        let close = CloseMsg {
            cooperative_close_sig: sig,
        };
        self.emit_msg(MessageBody::Close(close))?;
        log::debug!("channel {}: Open -> AwaitingClose", self.ch.id);
        Ok(())
    }

    pub fn handle_close(&mut self, msg: CloseMsg) -> Result<(), Error> {
        self.ch.require_stage(&[
            Lifecycle::Open,
            Lifecycle::PaymentProposed,
            Lifecycle::AwaitingClose,
        ])?;
        let unsigned = self.builders.cooperative_close_tx(self.ch)?;
        let counterparty_role = self.ch.other();
        let counterparty_pubkey = self.verifying_key_for(counterparty_role)?;
        keys::verify_tx_bytes(
            &unsigned.bytes,
            &msg.cooperative_close_sig,
            &counterparty_pubkey,
            "cooperative close",
        )?;
        self.ch.counterparty_coop_close_sig = Some(msg.cooperative_close_sig);

        let own_key = self.own_settlement_key()?;
        let own_sig = keys::sign_tx_bytes(&unsigned.bytes, &own_key);
        let (host_sig, guest_sig) =
            order_by_role(counterparty_role, msg.cooperative_close_sig, own_sig);
        let combined = SignedTx::new(unsigned, vec![host_sig, guest_sig]);
        self.ch.coop_close_tx = Some(combined.clone());
        self.ch.stage = Lifecycle::AwaitingClose;
        self.sink
            .emit_tx(TransactionEnvelope::Single(combined));
        log::debug!("channel {}: -> AwaitingClose (coop-close tx published)", self.ch.id);
        Ok(())
    }

    pub fn handle_coop_close_confirmed(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::AwaitingClose])?;
        self.ch.stage = Lifecycle::Closed;
        log::debug!("channel {}: AwaitingClose -> Closed", self.ch.id);
        Ok(())
    }

    // -- unilateral / force close ----------------------------------------

    pub fn handle_round_timeout(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[
            Lifecycle::PaymentProposed,
            Lifecycle::PaymentAccepted,
            Lifecycle::AwaitingClose,
        ])?;
        let ratchet_tx = self
            .ch
            .current_ratchet_tx
            .clone()
            .ok_or(Error::BuildTx("no ratchet tx to publish at force-close".into()))?;
        self.sink.emit_tx(TransactionEnvelope::Single(ratchet_tx));
        self.ch.stage = Lifecycle::AwaitingSettlementMintime;
        log::debug!("channel {}: round timeout -> AwaitingSettlementMintime", self.ch.id);
        Ok(())
    }

    pub fn handle_mintime_elapsed(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::AwaitingSettlementMintime])?;
        let with_host = self.ch.current_settle_with_host_tx.clone().ok_or(
            Error::BuildTx("no settlement tx to publish at force-close".into()),
        )?;
        self.sink.emit_tx(TransactionEnvelope::SettlementPair {
            with_host,
            with_guest: self.ch.current_settle_with_guest_tx.clone(),
        });
        self.ch.stage = Lifecycle::AwaitingSettlement;
        log::debug!(
            "channel {}: AwaitingSettlementMintime -> AwaitingSettlement",
            self.ch.id
        );
        Ok(())
    }

    pub fn handle_settlement_confirmed(&mut self) -> Result<(), Error> {
        self.ch.require_stage(&[Lifecycle::AwaitingSettlement])?;
        self.ch.stage = Lifecycle::Closed;
        log::debug!("channel {}: AwaitingSettlement -> Closed", self.ch.id);
        Ok(())
    }

    // -- messaging --------------------------------------------------------

    fn emit_msg(&mut self, body: MessageBody) -> Result<(), Error> {
        let msg_num = self.ch.next_msg_num();
        let mut message = Message::new(self.ch.id.clone(), msg_num, body);
        keys::sign_msg(&mut message, self.keys)?;
        self.sink.emit_msg(message);
        Ok(())
    }
}

impl Role {
    fn opposite(self) -> Role {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

impl Channel {
    fn signer_ratchet_acct(&self) -> chan_p2p::AccountId {
        match self.role {
            Role::Host => self.host_ratchet_acct.clone(),
            Role::Guest => self.guest_ratchet_acct.clone(),
        }
    }

    fn own_ratchet_seqnum(&self) -> u64 {
        match self.role {
            Role::Host => self.host_ratchet_acct_seqnum,
            Role::Guest => self.guest_ratchet_acct_seqnum,
        }
    }
}

/// Orders two signature shares as `(host_sig, guest_sig)` given which role
/// `labeled_role` belongs to.
fn order_by_role(
    labeled_role: Role,
    labeled_sig: SignatureBytes,
    other_sig: SignatureBytes,
) -> (SignatureBytes, SignatureBytes) {
    match labeled_role {
        Role::Host => (labeled_sig, other_sig),
        Role::Guest => (other_sig, labeled_sig),
    }
}
