//! Margay is a private `BitTorrent` tracker engine.
//!
//! Peers announce over HTTP ([BEP 3](https://www.bittorrent.org/beps/bep_0003.html),
//! [BEP 7](https://www.bittorrent.org/beps/bep_0007.html),
//! [BEP 23](https://www.bittorrent.org/beps/bep_0023.html)) or UDP
//! ([BEP 15](https://www.bittorrent.org/beps/bep_0015.html)). "Private" means
//! every HTTP request authenticates with a per-user passkey and transfer
//! volumes are attributed to users, which is what enables ratio enforcement,
//! hit-and-run detection and the bonus point economy.
//!
//! The crate splits into:
//!
//! - [`core`]: the domain layer (swarms, gate, stats, policies).
//! - [`servers`]: the delivery layer (HTTP and UDP).
//! - [`bootstrap`]: process wiring.
//! - [`config`]: typed configuration.
//! - [`shared`]: bencode, info-hash and clock primitives.
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod servers;
pub mod shared;

/// Working clock, for production.
#[cfg(not(test))]
pub type CurrentClock = shared::clock::Working;

/// Stopped version, for testing.
#[cfg(test)]
pub type CurrentClock = shared::clock::Stopped;
