//! Treasury, bridging, identity registration and ERC-8128 request signing
//! for a fleet of agent wallets spread across eight EVM chains.

pub mod bridge;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod erc8128;
pub mod identity;
pub mod registry;
pub mod sig_down;
pub mod telemetry;
pub mod treasury;
pub mod util;
pub mod wallet;
