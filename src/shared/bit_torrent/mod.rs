//! Common code for the `BitTorrent` protocol.
//!
//! It contains the primitive types shared by the HTTP and UDP delivery layers
//! and the core tracker: the bencode codec and the torrent info-hash.
pub mod bencode;
pub mod info_hash;

/// The maximum number of torrents that can be returned in a `scrape` response.
///
/// The [BEP 15. UDP Tracker Protocol for `BitTorrent`](https://www.bittorrent.org/beps/bep_0015.html)
/// defines this limit:
///
/// "Up to about 74 torrents can be scraped at once. A full scrape can't be done
/// with this protocol."
pub const MAX_SCRAPE_TORRENTS: u8 = 74;

/// The number of hex characters in a user passkey.
pub const PASSKEY_LENGTH: usize = 32;

/// The number of hex characters in a per-peer announce key. The key is 8
/// random bytes, hex encoded.
pub const ANNOUNCE_KEY_LENGTH: usize = 16;
