// Output sink (spec §6.2): accumulates the side effects a transition
// produces. Drained by the driver only after a handler returns
// successfully (spec §5) — a handler that fails must leave the sink, like
// the channel, untouched.

use chan_p2p::Message;

use crate::tx::SignedTx;

/// The publishable transaction(s) that result from one transition. A
/// settlement is always a pair (unless `GuestAmount = 0`, in which case
/// only the `SettleOnlyWithHost` half exists); ratchet, funding, coop-close,
/// top-up and cleanup are always single transactions.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionEnvelope {
    Single(SignedTx),
    SettlementPair {
        with_host: SignedTx,
        with_guest: Option<SignedTx>,
    },
}

/// The only intrinsic timer the FSM schedules: the round timer armed at
/// `PendingPaymentTime` and checked against `MaxRoundDuration` (spec §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerRequest {
    ArmRoundTimer { deadline: u64 },
    CancelRoundTimer,
}

/// One side effect produced by a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    OutputMsg(Message),
    OutputTx(TransactionEnvelope),
    Timer(TimerRequest),
}

/// Accumulates outputs for the duration of one transition. The driver reads
/// `drain()` after a handler returns `Ok`; on `Err` the caller must not call
/// `drain()` at all, so partially-emitted outputs from a failed handler
/// never reach the peer or the ledger.
#[derive(Default)]
pub struct OutputSink {
    outputs: Vec<Output>,
}

impl OutputSink {
    pub fn new() -> Self {
        OutputSink { outputs: Vec::new() }
    }

    pub fn emit_msg(&mut self, message: Message) {
        self.outputs.push(Output::OutputMsg(message));
    }

    pub fn emit_tx(&mut self, envelope: TransactionEnvelope) {
        self.outputs.push(Output::OutputTx(envelope));
    }

    pub fn arm_round_timer(&mut self, deadline: u64) {
        self.outputs
            .push(Output::Timer(TimerRequest::ArmRoundTimer { deadline }));
    }

    pub fn cancel_round_timer(&mut self) {
        self.outputs
            .push(Output::Timer(TimerRequest::CancelRoundTimer));
    }

    /// Removes and returns every output accumulated so far.
    pub fn drain(&mut self) -> Vec<Output> {
        std::mem::take(&mut self.outputs)
    }

    #[cfg(test)]
    pub fn peek(&self) -> &[Output] {
        &self.outputs
    }
}
