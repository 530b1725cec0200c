//! lsswitch-core — shared wire model, payload cipher, and network glue.
//! The services and daemon crates both depend on this one.

pub mod cipher;
pub mod config;
pub mod net;
pub mod wire;

pub use wire::{DiscoveryMessage, LocalSendClientInfo, SwitchMessage};
