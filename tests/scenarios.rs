// End-to-end scenarios for the channel FSM (exercising both the Host and
// Guest sides against each other, the way two real peers would), grounded
// directly on spec.md's numbered end-to-end scenarios.

use chan_p2p::{Message, SignatureBytes};

use starchannel::channel::PendingPayment;
use starchannel::{
    Channel, ChannelConfig, InputEvent, KeyVault, Lifecycle, LocalCommand,
    NullTxBuilders, Output, OutputSink, Role, TransactionEnvelope, Updater,
};

fn pubkey_hex(vault: &KeyVault, index: u32) -> String {
    hex::encode(vault.derive(index).unwrap().public_key_bytes().0)
}

/// Builds matching Host/Guest views of the same funded, `Open` channel.
fn two_party(
    host_amount: u64,
    guest_amount: u64,
) -> (Channel, Channel, KeyVault, KeyVault, ChannelConfig, NullTxBuilders) {
    let host_vault = KeyVault::with_seed(b"host scenario seed material...".to_vec());
    let guest_vault = KeyVault::with_seed(b"guest scenario seed material..".to_vec());

    let base = Channel {
        id: "escrow-account".into(),
        role: Role::Host,
        key_index: 0,
        host_acct: pubkey_hex(&host_vault, 0),
        guest_acct: pubkey_hex(&guest_vault, 1),
        escrow_acct: "escrow-multisig-account".into(),
        host_ratchet_acct: pubkey_hex(&host_vault, 2),
        guest_ratchet_acct: pubkey_hex(&guest_vault, 2),
        host_amount,
        guest_amount,
        channel_feerate: 100,
        max_round_duration: 3600,
        finality_delay: 60,
        funding_time: 0,
        payment_time: 0,
        pending_payment_time: 0,
        base_sequence_number: 1,
        round_number: 1,
        host_ratchet_acct_seqnum: 0,
        guest_ratchet_acct_seqnum: 0,
        funding_tx_seqnum: 0,
        pending: PendingPayment::default(),
        current_settle_with_guest_tx: None,
        current_settle_with_host_tx: None,
        counterparty_latest_settle_with_guest_tx: None,
        counterparty_latest_settle_with_host_tx: None,
        current_ratchet_tx: None,
        counterparty_coop_close_sig: None,
        coop_close_tx: None,
        last_msg_index: 0,
        passphrase: "test-network".into(),
        counterparty_address: String::new(),
        stage: Lifecycle::Open,
        top_ups_observed: 0,
    };

    let mut host_ch = base.clone();
    host_ch.role = Role::Host;
    let mut guest_ch = base;
    guest_ch.role = Role::Guest;

    (
        host_ch,
        guest_ch,
        host_vault,
        guest_vault,
        ChannelConfig::default(),
        NullTxBuilders,
    )
}

fn only_msg(outputs: Vec<Output>) -> Message {
    outputs
        .into_iter()
        .find_map(|o| match o {
            Output::OutputMsg(m) => Some(m),
            _ => None,
        })
        .expect("handler should have emitted exactly one message")
}

#[test]
fn open_payment_close() {
    let (mut host_ch, mut guest_ch, host_vault, guest_vault, config, builders) =
        two_party(1000, 0);

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::LocalCommand(LocalCommand::ProposePayment {
                amount: 100,
                time: 10,
            }),
            10,
        )
        .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::PaymentProposed);
    let propose_msg = only_msg(sink.drain());

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(propose_msg), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::PaymentAccepted);
    // The recipient defers its own balance commit until PaymentCompleteMsg.
    assert_eq!((guest_ch.host_amount, guest_ch.guest_amount), (1000, 0));
    let accept_msg = only_msg(sink.drain());

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(accept_msg), 10).unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::Open);
    assert_eq!((host_ch.host_amount, host_ch.guest_amount), (900, 100));
    let complete_msg = only_msg(sink.drain());

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(complete_msg), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::Open);
    assert_eq!((guest_ch.host_amount, guest_ch.guest_amount), (900, 100));

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::LocalCommand(LocalCommand::Close), 20)
            .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::AwaitingClose);
    let close_msg = only_msg(sink.drain());

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(close_msg), 20).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::AwaitingClose);
    let outputs = sink.drain();
    assert_eq!(outputs.len(), 1);
    assert!(matches!(
        outputs[0],
        Output::OutputTx(TransactionEnvelope::Single(_))
    ));
}

#[test]
fn reverse_payment_to_zero_drops_guest_sig() {
    let (mut host_ch, mut guest_ch, host_vault, guest_vault, config, builders) =
        two_party(500, 500);

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::LocalCommand(LocalCommand::ProposePayment {
                amount: 500,
                time: 10,
            }),
            10,
        )
        .unwrap();
    }
    let propose_msg = only_msg(sink.drain());
    match &propose_msg.body {
        chan_p2p::MessageBody::PaymentPropose(p) => {
            assert!(p.sender_settle_with_guest_sig.is_none());
        }
        _ => panic!("expected a PaymentProposeMsg"),
    }

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(propose_msg), 10).unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::PaymentAccepted);
    let accept_msg = only_msg(sink.drain());
    match &accept_msg.body {
        chan_p2p::MessageBody::PaymentAccept(a) => {
            assert!(a.recipient_settle_with_guest_sig.is_none());
        }
        _ => panic!("expected a PaymentAcceptMsg"),
    }

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(accept_msg), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::Open);
    assert_eq!((guest_ch.host_amount, guest_ch.guest_amount), (1000, 0));
}

#[test]
fn stale_round_is_silently_dropped() {
    let (_host_ch, mut guest_ch, _host_vault, guest_vault, config, builders) =
        two_party(1000, 0);
    guest_ch.round_number = 5;
    let before = guest_ch.clone();

    let stale = chan_p2p::PaymentProposeMsg {
        payment_amount: 10,
        payment_time: 1,
        round_number: 3,
        sender_settle_with_host_sig: SignatureBytes([0u8; 64]),
        sender_settle_with_guest_sig: None,
    };
    let msg = Message::new(
        guest_ch.id.clone(),
        guest_ch.last_msg_index + 1,
        chan_p2p::MessageBody::PaymentPropose(stale),
    );

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(InputEvent::InboundMsg(msg), 1).unwrap();
    }
    assert!(sink.drain().is_empty());
    assert_eq!(guest_ch.stage, before.stage);
    assert_eq!(guest_ch.round_number, before.round_number);
    assert_eq!(
        (guest_ch.host_amount, guest_ch.guest_amount),
        (before.host_amount, before.guest_amount)
    );
}

#[test]
fn round_timeout_forces_unilateral_close() {
    let (mut host_ch, _guest_ch, host_vault, _guest_vault, config, builders) =
        two_party(1000, 0);
    host_ch.max_round_duration = 60;

    // Simulate an already-confirmed first round so a ratchet/settlement tx
    // is on record for the force-close path to republish.
    host_ch.current_ratchet_tx = Some(starchannel::SignedTx {
        role: starchannel::TxRole::RatchetTx,
        bytes: vec![1, 2, 3],
        sigs: vec![SignatureBytes([0u8; 64]), SignatureBytes([1u8; 64])],
    });
    host_ch.current_settle_with_host_tx = Some(starchannel::SignedTx {
        role: starchannel::TxRole::SettleOnlyWithHostTx,
        bytes: vec![4, 5, 6],
        sigs: vec![SignatureBytes([0u8; 64]), SignatureBytes([1u8; 64])],
    });

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::LocalCommand(LocalCommand::ProposePayment {
                amount: 100,
                time: 100,
            }),
            100,
        )
        .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::PaymentProposed);
    sink.drain();

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::TimerFired(starchannel::TimerKind::RoundTimer),
            170,
        )
        .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::AwaitingSettlementMintime);
    let outputs = sink.drain();
    assert_eq!(outputs.len(), 1);
    assert!(matches!(
        outputs[0],
        Output::OutputTx(TransactionEnvelope::Single(_))
    ));

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::LedgerObserved(starchannel::LedgerEvent::SettlementMintimeElapsed),
            200,
        )
        .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::AwaitingSettlement);
    let outputs = sink.drain();
    assert_eq!(outputs.len(), 1);
    assert!(matches!(
        outputs[0],
        Output::OutputTx(TransactionEnvelope::SettlementPair { .. })
    ));

    let mut sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut sink,
        };
        u.dispatch(
            InputEvent::LedgerObserved(starchannel::LedgerEvent::SettlementConfirmed),
            200,
        )
        .unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::Closed);
}

#[test]
fn collision_unequal_amounts_host_nets_the_difference() {
    let (mut host_ch, mut guest_ch, host_vault, guest_vault, config, builders) =
        two_party(500, 500);

    // Both sides propose concurrently, before either has seen the other's
    // message (spec §8 scenario 3): Host proposes 100, Guest proposes 30.
    let mut host_sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut host_sink,
        };
        u.dispatch(
            InputEvent::LocalCommand(LocalCommand::ProposePayment {
                amount: 100,
                time: 10,
            }),
            10,
        )
        .unwrap();
    }
    let host_propose = only_msg(host_sink.drain());

    let mut guest_sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut guest_sink,
        };
        u.dispatch(
            InputEvent::LocalCommand(LocalCommand::ProposePayment {
                amount: 30,
                time: 10,
            }),
            10,
        )
        .unwrap();
    }
    let guest_propose = only_msg(guest_sink.drain());
    assert_eq!(guest_ch.pending.amount_sent, 30);

    // Guest's proposal collides with Host's already-PaymentProposed state:
    // Host is the larger proposer (100 > 30), so it nets the difference and
    // stays PaymentProposed while Guest defers to AwaitingPaymentMerge.
    let mut host_sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut host_sink,
        };
        u.dispatch(InputEvent::InboundMsg(guest_propose), 10).unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::PaymentProposed);
    assert_eq!(host_ch.pending.amount_sent, 70);
    let host_resend = only_msg(host_sink.drain());

    let mut guest_sink = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut guest_sink,
        };
        u.dispatch(InputEvent::InboundMsg(host_propose), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::AwaitingPaymentMerge);

    // Host's netted resend (70) is accepted as an ordinary proposal.
    let mut guest_sink2 = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut guest_sink2,
        };
        u.dispatch(InputEvent::InboundMsg(host_resend), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::PaymentAccepted);
    let guest_accept = only_msg(guest_sink2.drain());

    // Host finishes the round and commits its own balance immediately.
    let mut host_sink2 = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut host_ch,
            keys: &host_vault,
            builders: &builders,
            config: &config,
            sink: &mut host_sink2,
        };
        u.dispatch(InputEvent::InboundMsg(guest_accept), 10).unwrap();
    }
    assert_eq!(host_ch.stage, Lifecycle::Open);
    // Host's real on-chain balance shift is the net 70, not either original
    // gross proposal (spec §8 scenario 3).
    assert_eq!((host_ch.host_amount, host_ch.guest_amount), (430, 570));
    let host_complete = only_msg(host_sink2.drain());

    // Guest, which deferred its own commit through the merge, nets the same
    // 70 once `PaymentComplete` arrives — not the 40 a stale
    // `pending.amount_received` overwrite would have produced.
    let mut guest_sink3 = OutputSink::new();
    {
        let mut u = Updater {
            ch: &mut guest_ch,
            keys: &guest_vault,
            builders: &builders,
            config: &config,
            sink: &mut guest_sink3,
        };
        u.dispatch(InputEvent::InboundMsg(host_complete), 10).unwrap();
    }
    assert_eq!(guest_ch.stage, Lifecycle::Open);
    assert_eq!((guest_ch.host_amount, guest_ch.guest_amount), (430, 570));
}
