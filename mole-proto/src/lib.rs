//! Wire protocol of the mole tunnel.
//!
//! An ingress peer speaks SOCKS5 to local applications and forwards the traffic, encrypted, to an
//! egress peer. This crate holds the parts both peers share: the SOCKS5 request layout
//! ([`target`]), the AEAD frame cipher ([`crypto`]), the length-prefixed frame format ([`frame`])
//! and the accumulate-until-threshold receive buffer ([`receive`]).
//!
//! Every parser here is a pure function of the bytes buffered so far and answers with a
//! [`Progress`]: either the unit is complete, or the total amount of bytes that must be buffered
//! before asking again.

pub mod crypto;
pub mod frame;
pub mod receive;
pub mod socks5;
pub mod target;

mod progress;
mod u8_repr_enum;

pub use progress::*;
pub use u8_repr_enum::*;
