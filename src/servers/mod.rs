//! The delivery layer: servers speaking the `BitTorrent` tracker protocols on
//! top of the [`core`](crate::core) tracker.
pub mod http;
pub mod udp;
