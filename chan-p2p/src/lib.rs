// Channel P2P library: wire messages and canonical signed-envelope codec
// for a bilateral payment channel protocol.
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

#![recursion_limit = "256"]
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate amplify_derive;
extern crate serde_crate as serde;

pub mod codec;
pub mod msg;

pub use codec::{Error as CodecError, KeyPair};
pub use msg::{
    AccountId, ChannelAcceptMsg, ChannelId, ChannelProposeMsg, CloseMsg,
    Message, MessageBody, PaymentAcceptMsg, PaymentCompleteMsg,
    PaymentProposeMsg, PublicKeyBytes, SignatureBytes,
};

/// Protocol version carried by every [`Message`]. A receiver MUST reject any
/// message whose `version` differs from this constant.
pub const PROTOCOL_VERSION: u16 = 2;
