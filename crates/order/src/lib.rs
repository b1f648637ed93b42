//! The nocturne order model.
//!
//! Orders are immutable records identified by the keccak256 hash of their
//! canonical binary layout. Prices and volumes use the CoExp encoding
//! (`co · 10^exp`, adjusted) so they fit the shared prime field with wide
//! dynamic range. An order is never sent anywhere whole: it is split into
//! fragments, one per darknode, each carrying Shamir shares of the scalar
//! fields and verbatim copies of the public ones.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod coexp;
mod fragment;
mod order;
mod tokens;

pub use coexp::{price_from_co_exp, price_to_co_exp, volume_from_co_exp, volume_to_co_exp, CoExp};
pub use fragment::{CoExpShare, Fragment};
pub use order::{Order, OrderError, OrderId, OrderType, Parity, Settlement};
pub use tokens::{Token, TokenPair};
