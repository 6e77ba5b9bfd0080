// Local channel-opening policy (spec §3 supplement, §6.6).
//
// The protocol itself fixes no bounds on fee rate, round duration or
// initial balances; a real node still needs to decide which inbound
// `ChannelProposeMsg`s are worth accepting before it ever touches the
// ledger. `ChannelConfig` plays the role the teacher's own `Policy` plays
// for `open_channel`/`accept_channel`: a local, operator-set bound checked
// against the peer's proposal, independent of protocol validity.

use chan_p2p::ChannelProposeMsg;

/// Errors produced while validating a [`ChannelProposeMsg`] against a local
/// [`ChannelConfig`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum PolicyError {
    /// proposed channel fee rate {proposed} is outside of the local policy
    /// range ({lowest_accepted}..{highest_accepted})
    FeerateUnreasonable {
        proposed: u64,
        lowest_accepted: u64,
        highest_accepted: u64,
    },

    /// proposed finality delay {proposed} is below the local minimum of
    /// {required_minimum}
    FinalityDelayTooSmall { proposed: u64, required_minimum: u64 },

    /// proposed maximum round duration {proposed} is outside of the local
    /// policy range ({lowest_accepted}..{highest_accepted})
    RoundDurationUnreasonable {
        proposed: u64,
        lowest_accepted: u64,
        highest_accepted: u64,
    },

    /// proposed host funding {proposed} is below the local minimum of
    /// {required_minimum}
    HostAmountTooSmall { proposed: u64, required_minimum: u64 },

    /// proposed guest funding {proposed} is below the local minimum of
    /// {required_minimum}
    GuestAmountTooSmall { proposed: u64, required_minimum: u64 },
}

/// Local bounds a node imposes on channels it will open or accept. There is
/// no protocol-level equivalent of this type: two nodes with different
/// configs can still interoperate, each simply refusing proposals its own
/// operator wouldn't accept.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChannelConfig {
    pub feerate_min: u64,
    pub feerate_max: u64,
    pub finality_delay_min: u64,
    pub round_duration_min: u64,
    pub round_duration_max: u64,
    pub host_amount_min: u64,
    pub guest_amount_min: u64,
}

impl Default for ChannelConfig {
    /// Reasonable defaults: a node can always narrow these via its own
    /// configuration before opening or accepting channels.
    fn default() -> Self {
        ChannelConfig {
            feerate_min: 1,
            feerate_max: 1_000_000,
            finality_delay_min: 1,
            round_duration_min: 30,
            round_duration_max: 86_400,
            host_amount_min: 1,
            guest_amount_min: 0,
        }
    }
}

impl ChannelConfig {
    /// Validates an inbound `ChannelProposeMsg` against this policy. Called
    /// by the Guest before it emits `ChannelAcceptMsg` (spec §4.3).
    pub fn validate_propose(
        &self,
        propose: &ChannelProposeMsg,
    ) -> Result<(), PolicyError> {
        if propose.channel_feerate < self.feerate_min
            || propose.channel_feerate > self.feerate_max
        {
            return Err(PolicyError::FeerateUnreasonable {
                proposed: propose.channel_feerate,
                lowest_accepted: self.feerate_min,
                highest_accepted: self.feerate_max,
            });
        }

        if propose.finality_delay_secs < self.finality_delay_min {
            return Err(PolicyError::FinalityDelayTooSmall {
                proposed: propose.finality_delay_secs,
                required_minimum: self.finality_delay_min,
            });
        }

        if propose.max_round_duration_secs < self.round_duration_min
            || propose.max_round_duration_secs > self.round_duration_max
        {
            return Err(PolicyError::RoundDurationUnreasonable {
                proposed: propose.max_round_duration_secs,
                lowest_accepted: self.round_duration_min,
                highest_accepted: self.round_duration_max,
            });
        }

        if propose.host_amount < self.host_amount_min {
            return Err(PolicyError::HostAmountTooSmall {
                proposed: propose.host_amount,
                required_minimum: self.host_amount_min,
            });
        }

        if propose.guest_amount < self.guest_amount_min {
            return Err(PolicyError::GuestAmountTooSmall {
                proposed: propose.guest_amount,
                required_minimum: self.guest_amount_min,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn propose() -> ChannelProposeMsg {
        ChannelProposeMsg {
            host_acct: "host".to_string(),
            guest_acct: "guest".to_string(),
            host_ratchet_acct: "host-ratchet".to_string(),
            guest_ratchet_acct: "guest-ratchet".to_string(),
            host_amount: 1000,
            guest_amount: 0,
            channel_feerate: 100,
            max_round_duration_secs: 3600,
            finality_delay_secs: 60,
            base_sequence_number: 1,
            funding_time: 0,
        }
    }

    #[test]
    fn accepts_reasonable_proposal() {
        let config = ChannelConfig::default();
        assert!(config.validate_propose(&propose()).is_ok());
    }

    #[test]
    fn rejects_feerate_out_of_range() {
        let config = ChannelConfig::default();
        let mut msg = propose();
        msg.channel_feerate = config.feerate_max + 1;
        assert_eq!(
            config.validate_propose(&msg),
            Err(PolicyError::FeerateUnreasonable {
                proposed: msg.channel_feerate,
                lowest_accepted: config.feerate_min,
                highest_accepted: config.feerate_max,
            })
        );
    }

    #[test]
    fn rejects_host_amount_too_small() {
        let mut config = ChannelConfig::default();
        config.host_amount_min = 500;
        let mut msg = propose();
        msg.host_amount = 100;
        assert_eq!(
            config.validate_propose(&msg),
            Err(PolicyError::HostAmountTooSmall {
                proposed: 100,
                required_minimum: 500,
            })
        );
    }
}
