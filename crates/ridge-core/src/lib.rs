//! ridge-core: shared types, wire format, and layout descriptors.
//! The issuance engine and every tool built on it depend on this crate.

pub mod config;
pub mod layout;
pub mod wire;

pub use layout::{BasicType, Datatype, DerivedLayout};
pub use wire::{PacketType, PktFlags};
