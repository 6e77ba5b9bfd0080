// Starchannel: bilateral payment-channel finite-state machine over a
// Stellar-family ledger.
//
// Written in 2019-2024 by
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
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate amplify_derive;
extern crate serde_crate as serde;

pub mod apply;
pub mod channel;
pub mod error;
pub mod keys;
pub mod output;
pub mod policy;
pub mod tx;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use channel::{Channel, Lifecycle, Role};
pub use error::Error;
pub use keys::KeyVault;
pub use output::{Output, OutputSink, TimerRequest, TransactionEnvelope};
pub use policy::{ChannelConfig, PolicyError};
pub use tx::{NullTxBuilders, SignedTx, TxBuilders, TxRole, UnsignedTx};
pub use updater::{
    CreateChannelParams, InputEvent, LedgerEvent, LocalCommand, TimerKind,
    Updater,
};
