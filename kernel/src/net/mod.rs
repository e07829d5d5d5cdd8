//! Networking
//!
//! The core carries the packet filter; the rest of the network stack lives
//! outside this tree.

pub mod filter;

pub use filter::{Direction, FilterAction, FilterChain, FilterRule, Netfilter, Packet};
