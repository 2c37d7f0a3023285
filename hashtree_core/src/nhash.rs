//! `nhash`: the human-shareable, self-describing text encoding of a
//! [`Cid`]. Bech32-framed so that a truncated or mistyped identifier
//! is rejected by its checksum rather than silently resolving to the
//! wrong block.

use crate::Hash;
use crate::cid::Cid;
use crate::error::{HashtreeError, Result};
use bech32::{Bech32, Hrp};

const HRP: Hrp = Hrp::parse_unchecked("nhash");
const VERSION: u8 = 0;

/// Encodes a CID as `nhash1...`.
pub fn encode(cid: &Cid) -> String {
    let mut data = Vec::with_capacity(1 + 32 + 32);
    data.push(VERSION);
    data.extend_from_slice(cid.hash.as_bytes());
    if let Some(key) = cid.key {
        data.extend_from_slice(&key);
    }
    bech32::encode::<Bech32>(HRP, &data).expect("bech32 encoding of a bounded byte buffer")
}

/// Decodes an `nhash1...` string back into a CID, rejecting unknown
/// versions and checksum failures.
pub fn decode(text: &str) -> Result<Cid> {
    let (hrp, data) =
        bech32::decode(text).map_err(|e| HashtreeError::Malformed(format!("bad nhash: {e}")))?;
    if hrp != HRP {
        return Err(HashtreeError::Malformed(format!(
            "unexpected nhash hrp {hrp}"
        )));
    }
    if data.is_empty() || data[0] != VERSION {
        return Err(HashtreeError::Malformed("unknown nhash version".into()));
    }
    let body = &data[1..];
    match body.len() {
        32 => {
            let hash = Hash::from_bytes(body.try_into().unwrap());
            Ok(Cid::plain(hash))
        }
        64 => {
            let hash = Hash::from_bytes(body[..32].try_into().unwrap());
            let key: [u8; 32] = body[32..].try_into().unwrap();
            Ok(Cid::encrypted(hash, key))
        }
        other => Err(HashtreeError::Malformed(format!(
            "unexpected nhash body length {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_and_encrypted() {
        let plain = Cid::plain(Hash::new(b"x"));
        assert_eq!(decode(&encode(&plain)).unwrap(), plain);

        let encrypted = Cid::encrypted(Hash::new(b"y"), [7u8; 32]);
        assert_eq!(decode(&encode(&encrypted)).unwrap(), encrypted);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let encoded = encode(&Cid::plain(Hash::new(b"z")));
        let mut corrupted = encoded.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 1;
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(decode(&corrupted).is_err());
    }

    #[test]
    fn keyed_address_is_longer_by_key_plus_framing() {
        let plain = encode(&Cid::plain(Hash::new(b"a")));
        let encrypted = encode(&Cid::encrypted(Hash::new(b"a"), [0u8; 32]));
        assert!(encrypted.len() > plain.len());
    }
}
