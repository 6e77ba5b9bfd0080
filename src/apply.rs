// "Copy channel, apply hypothetically" (spec §9): handlers that must
// verify a counterparty's claimed settlement transactions build them
// against a hypothetical post-payment snapshot rather than mutating the
// real channel, so a failed verification never touches committed state.

use crate::channel::{Channel, Role};

/// Returns a clone of `ch` with `amount` moved from `sender` to the other
/// side. Round-number bookkeeping is the caller's responsibility: every call
/// site sets the clone's `round_number` to the proposer's last *committed*
/// round plus one, whether the proposal is fresh or a netted resend after a
/// collision (spec §4.4).
pub fn apply_payment(ch: &Channel, sender: Role, amount: u64) -> Channel {
    let mut ch2 = ch.clone();
    match sender {
        Role::Host => {
            ch2.host_amount -= amount;
            ch2.guest_amount += amount;
        }
        Role::Guest => {
            ch2.guest_amount -= amount;
            ch2.host_amount += amount;
        }
    }
    ch2
}
