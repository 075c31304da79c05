//! Byte-wise percent decoding for URL query components.
//!
//! `BitTorrent` infohashes and peer ids are percent encoded like any other
//! URL parameter, but they encode raw binary that is usually not valid UTF-8.
//! The decoder therefore works on bytes: `%XX` becomes the literal byte, `+`
//! becomes a space, and everything else passes through verbatim. Decoding
//! never fails; a dangling or malformed escape passes through as its literal
//! bytes, matching what permissive trackers do.

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// It percent-decodes a raw query component into bytes.
#[must_use]
pub fn percent_decode_bytes(raw: &str) -> Vec<u8> {
    let input = raw.as_bytes();
    let mut output = Vec::with_capacity(input.len());

    let mut position = 0;
    while position < input.len() {
        match input[position] {
            b'%' => {
                let high = input.get(position + 1).and_then(|byte| hex_value(*byte));
                let low = input.get(position + 2).and_then(|byte| hex_value(*byte));

                if let (Some(high), Some(low)) = (high, low) {
                    output.push((high << 4) | low);
                    position += 3;
                } else {
                    output.push(b'%');
                    position += 1;
                }
            }
            b'+' => {
                output.push(b' ');
                position += 1;
            }
            byte => {
                output.push(byte);
                position += 1;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::percent_decode_bytes;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    #[test]
    fn it_should_decode_escapes_into_literal_bytes() {
        assert_eq!(percent_decode_bytes("%3B%24U%04"), vec![0x3b, 0x24, b'U', 0x04]);
    }

    #[test]
    fn it_should_decode_plus_into_a_space() {
        assert_eq!(percent_decode_bytes("a+b"), b"a b".to_vec());
    }

    #[test]
    fn unescaped_bytes_should_pass_through_verbatim() {
        assert_eq!(percent_decode_bytes("-qB4520-"), b"-qB4520-".to_vec());
    }

    #[test]
    fn malformed_escapes_should_pass_through_as_literals() {
        assert_eq!(percent_decode_bytes("%"), b"%".to_vec());
        assert_eq!(percent_decode_bytes("%Z1"), b"%Z1".to_vec());
        assert_eq!(percent_decode_bytes("%4"), b"%4".to_vec());
    }

    #[test]
    fn it_should_decode_a_percent_encoded_info_hash() {
        let encoded = "%3B%24U%04%CF%5F%11%BB%DB%E1%20%1C%EAjk%F4Z%EE%1B%C0";

        assert_eq!(
            InfoHash::try_from(percent_decode_bytes(encoded)).unwrap(),
            InfoHash::from_str("3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0").unwrap()
        );
    }

    #[test]
    fn it_should_decode_a_percent_encoded_peer_id() {
        assert_eq!(percent_decode_bytes("%2DqB00000000000000000"), b"-qB00000000000000000".to_vec());
    }
}
