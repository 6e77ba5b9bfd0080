// Error taxonomy for the channel FSM (spec §7).
//
// `UnexpectedState`, `ChannelExists` and `UnusedSettleWithGuestSig` are
// validation failures raised by a handler before it mutates anything;
// `SigVerify` and `BuildTx` wrap failures from the signature engine and the
// (opaque) transaction builders respectively. Silent drops are never
// represented here — they are logged and return `Ok(())` from the handler,
// per spec §7's propagation policy.

use crate::channel::Lifecycle;

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// message or command arrived while the channel was in state {current},
    /// which does not accept it (expected one of {expected:?})
    UnexpectedState {
        current: Lifecycle,
        expected: &'static [Lifecycle],
    },

    /// a `ChannelProposeMsg` arrived for a channel that already exists
    /// (current state {current})
    ChannelExists { current: Lifecycle },

    /// counterparty supplied a settle-with-guest signature while the
    /// channel's guest amount is zero
    UnusedSettleWithGuestSig,

    /// signing was attempted without a wallet seed
    NoSeed,

    /// signature verification failed for {0}
    #[from]
    SigVerify(chan_p2p::CodecError),

    /// transaction builder failed: {0}
    BuildTx(String),

    /// payment amount {amount} exceeds our own balance {balance}
    InsufficientOwnBalance { amount: u64, balance: u64 },

    /// local channel configuration rejected the proposal: {0}
    #[from]
    Policy(crate::policy::PolicyError),
}

impl Error {
    pub fn unexpected(
        current: Lifecycle,
        expected: &'static [Lifecycle],
    ) -> Self {
        Error::UnexpectedState { current, expected }
    }
}
