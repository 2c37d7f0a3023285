//! `npath`: a bech32-framed, tagged encoding of `(signer-pubkey, tree-name,
//! path-segments)`. Used for deep links that stay valid across root
//! updates, since they name a path through a tree rather than a CID.

use crate::error::{HashtreeError, Result};
use bech32::{Bech32, Hrp};

const HRP: Hrp = Hrp::parse_unchecked("npath");
const VERSION: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NPath {
    pub signer: [u8; 32],
    pub tree_name: Vec<u8>,
    pub segments: Vec<Vec<u8>>,
}

/// Encodes as `version:u8 ‖ signer:32 ‖ len(tree_name):u16 ‖ tree_name ‖
/// (len(segment):u16 ‖ segment)* ‖ 0xFFFF` (an empty-length sentinel that
/// cannot collide with a real segment, since segments are length-prefixed
/// and bounded below `u16::MAX`).
pub fn encode(path: &NPath) -> String {
    let mut data = Vec::new();
    data.push(VERSION);
    data.extend_from_slice(&path.signer);
    data.extend_from_slice(&(path.tree_name.len() as u16).to_be_bytes());
    data.extend_from_slice(&path.tree_name);
    for segment in &path.segments {
        data.extend_from_slice(&(segment.len() as u16).to_be_bytes());
        data.extend_from_slice(segment);
    }
    bech32::encode::<Bech32>(HRP, &data).expect("bech32 encoding of a bounded byte buffer")
}

pub fn decode(text: &str) -> Result<NPath> {
    let (hrp, data) =
        bech32::decode(text).map_err(|e| HashtreeError::Malformed(format!("bad npath: {e}")))?;
    if hrp != HRP {
        return Err(HashtreeError::Malformed(format!(
            "unexpected npath hrp {hrp}"
        )));
    }
    let mut cursor = 0usize;
    let next = |cursor: &mut usize, n: usize| -> Result<&[u8]> {
        if data.len() < *cursor + n {
            return Err(HashtreeError::Malformed("truncated npath".into()));
        }
        let slice = &data[*cursor..*cursor + n];
        *cursor += n;
        Ok(slice)
    };
    let version = next(&mut cursor, 1)?[0];
    if version != VERSION {
        return Err(HashtreeError::Malformed("unknown npath version".into()));
    }
    let signer: [u8; 32] = next(&mut cursor, 32)?.try_into().unwrap();
    let name_len = u16::from_be_bytes(next(&mut cursor, 2)?.try_into().unwrap()) as usize;
    let tree_name = next(&mut cursor, name_len)?.to_vec();
    let mut segments = Vec::new();
    while cursor < data.len() {
        let seg_len = u16::from_be_bytes(next(&mut cursor, 2)?.try_into().unwrap()) as usize;
        let segment = next(&mut cursor, seg_len)?.to_vec();
        segments.push(segment);
    }
    Ok(NPath {
        signer,
        tree_name,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let path = NPath {
            signer: [9u8; 32],
            tree_name: b"docs".to_vec(),
            segments: vec![b"a".to_vec(), b"b.txt".to_vec()],
        };
        assert_eq!(decode(&encode(&path)).unwrap(), path);
    }

    #[test]
    fn round_trips_with_no_segments() {
        let path = NPath {
            signer: [0u8; 32],
            tree_name: b"root".to_vec(),
            segments: vec![],
        };
        assert_eq!(decode(&encode(&path)).unwrap(), path);
    }
}
