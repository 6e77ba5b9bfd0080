#![cfg(test)]
// Shared fixture for FSM tests: a funded, `Open` two-party channel with
// real derived keys, so signature verification in handler tests exercises
// the actual codec rather than a stub.

use chan_p2p::codec::KeyPair;

use crate::channel::{Channel, Lifecycle, PendingPayment, Role};
use crate::keys::KeyVault;
use crate::policy::ChannelConfig;
use crate::tx::NullTxBuilders;

pub struct Party {
    pub vault: KeyVault,
    pub channel: Channel,
}

fn pubkey_hex(pair: &KeyPair) -> String {
    hex::encode(pair.public_key_bytes().0)
}

/// Builds matching Host and Guest views of the same `Open` channel, with
/// `host_amount`/`guest_amount` as given and `round_number = 1`.
pub fn two_party_fixture(
    host_amount: u64,
    guest_amount: u64,
) -> (Party, Party, ChannelConfig, NullTxBuilders) {
    let host_vault = KeyVault::with_seed(b"host wallet seed material......".to_vec());
    let guest_vault = KeyVault::with_seed(b"guest wallet seed material.....".to_vec());

    let host_escrow_pub = pubkey_hex(&host_vault.escrow_key(0).unwrap());
    let guest_guest_pub = pubkey_hex(&guest_vault.guest_key(0).unwrap());
    let host_ratchet_pub = pubkey_hex(&host_vault.ratchet_key(0).unwrap());
    let guest_ratchet_pub = pubkey_hex(&guest_vault.ratchet_key(0).unwrap());

    let base = Channel {
        id: "escrow-account".into(),
        role: Role::Host,
        key_index: 0,
        host_acct: host_escrow_pub,
        guest_acct: guest_guest_pub,
        escrow_acct: "escrow-multisig-account".into(),
        host_ratchet_acct: host_ratchet_pub,
        guest_ratchet_acct: guest_ratchet_pub,
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

    let mut host_channel = base.clone();
    host_channel.role = Role::Host;
    let mut guest_channel = base;
    guest_channel.role = Role::Guest;

    (
        Party {
            vault: host_vault,
            channel: host_channel,
        },
        Party {
            vault: guest_vault,
            channel: guest_channel,
        },
        ChannelConfig::default(),
        NullTxBuilders,
    )
}
