//! The block codec (C1): deterministic encode/decode of the three block
//! kinds that make up a tree, and the content-addressing rule over them.
//!
//! A block is one of three kinds discriminated by a single leading type
//! tag byte. Encoding is deterministic — equal logical content always
//! produces bitwise-equal bytes — so identical subtrees converge to the
//! same address. The hash function (`Hash::new`) is applied to the
//! *encrypted* bytes produced by `hashtree_core::crypto`, never to the
//! plaintext block bytes defined here.

use crate::cid::{Cid, LinkType};
use crate::error::{HashtreeError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_DIR: u8 = 0x00;
const TAG_BLOB: u8 = 0x01;
const TAG_CHUNKED: u8 = 0x02;

/// `{name, cid, size, type}` as defined in the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Bytes,
    pub cid: Cid,
    pub size: u64,
    pub link_type: LinkType,
}

impl DirEntry {
    /// Names may not contain `/` or NUL; both would be ambiguous with path
    /// separators and C-string termination used elsewhere in the stack.
    pub fn validate_name(name: &[u8]) -> Result<()> {
        if name.iter().any(|&b| b == b'/' || b == 0) {
            return Err(HashtreeError::Malformed(
                "directory entry name contains '/' or NUL".into(),
            ));
        }
        Ok(())
    }
}

/// One `(cid, size)` pair in a chunked file's chunk list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub cid: Cid,
    pub size: u64,
}

/// A decoded block, in plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Dir(Vec<DirEntry>),
    Blob(Bytes),
    Chunked(Vec<ChunkEntry>),
}

impl Block {
    pub fn link_type(&self) -> LinkType {
        match self {
            Block::Dir(_) => LinkType::Dir,
            Block::Blob(_) | Block::Chunked(_) => LinkType::Blob,
        }
    }
}

fn put_cid(buf: &mut BytesMut, cid: &Cid) {
    buf.put_slice(cid.hash.as_bytes());
    match cid.key {
        Some(key) => {
            buf.put_u8(1);
            buf.put_slice(&key);
        }
        None => buf.put_u8(0),
    }
}

fn get_cid(buf: &mut Bytes) -> Result<Cid> {
    if buf.remaining() < 33 {
        return Err(HashtreeError::Malformed("truncated cid".into()));
    }
    let mut hash_bytes = [0u8; 32];
    buf.copy_to_slice(&mut hash_bytes);
    let key_present = buf.get_u8();
    let key = match key_present {
        0 => None,
        1 => {
            if buf.remaining() < 32 {
                return Err(HashtreeError::Malformed("truncated cid key".into()));
            }
            let mut key = [0u8; 32];
            buf.copy_to_slice(&mut key);
            Some(key)
        }
        other => {
            return Err(HashtreeError::Malformed(format!(
                "invalid keyPresent byte {other}"
            )));
        }
    };
    Ok(Cid {
        hash: crate::Hash::from_bytes(hash_bytes),
        key,
    })
}

/// Encodes a block to its deterministic plaintext byte representation.
pub fn encode_block(block: &Block) -> Result<Bytes> {
    match block {
        Block::Dir(entries) => encode_dir(entries),
        Block::Blob(bytes) => {
            let mut buf = BytesMut::with_capacity(1 + bytes.len());
            buf.put_u8(TAG_BLOB);
            buf.put_slice(bytes);
            Ok(buf.freeze())
        }
        Block::Chunked(chunks) => encode_chunked(chunks),
    }
}

fn encode_dir(entries: &[DirEntry]) -> Result<Bytes> {
    for w in entries.windows(2) {
        if w[0].name >= w[1].name {
            return Err(HashtreeError::Malformed(
                "directory entries not strictly sorted by name".into(),
            ));
        }
    }
    let mut buf = BytesMut::with_capacity(1 + entries.len() * 64);
    buf.put_u8(TAG_DIR);
    for entry in entries {
        DirEntry::validate_name(&entry.name)?;
        if entry.name.len() > u16::MAX as usize {
            return Err(HashtreeError::Malformed("entry name too long".into()));
        }
        buf.put_u16(entry.name.len() as u16);
        buf.put_slice(&entry.name);
        put_cid(&mut buf, &entry.cid);
        buf.put_u64(entry.size);
        buf.put_u8(entry.link_type.tag());
    }
    Ok(buf.freeze())
}

fn encode_chunked(chunks: &[ChunkEntry]) -> Result<Bytes> {
    if chunks.is_empty() {
        return Err(HashtreeError::Malformed(
            "chunked node must have at least one chunk".into(),
        ));
    }
    let mut buf = BytesMut::with_capacity(1 + chunks.len() * 41);
    buf.put_u8(TAG_CHUNKED);
    for chunk in chunks {
        put_cid(&mut buf, &chunk.cid);
        buf.put_u64(chunk.size);
    }
    Ok(buf.freeze())
}

/// Decodes and validates a block's plaintext bytes.
pub fn decode_block(mut bytes: Bytes) -> Result<Block> {
    if bytes.is_empty() {
        return Err(HashtreeError::Malformed("empty block".into()));
    }
    let tag = bytes.get_u8();
    match tag {
        TAG_DIR => decode_dir(bytes),
        TAG_BLOB => Ok(Block::Blob(bytes)),
        TAG_CHUNKED => decode_chunked(bytes),
        other => Err(HashtreeError::Malformed(format!(
            "unknown block type tag {other}"
        ))),
    }
}

fn decode_dir(mut bytes: Bytes) -> Result<Block> {
    let mut entries = Vec::new();
    while bytes.has_remaining() {
        if bytes.remaining() < 2 {
            return Err(HashtreeError::Malformed("truncated entry name length".into()));
        }
        let name_len = bytes.get_u16() as usize;
        if bytes.remaining() < name_len {
            return Err(HashtreeError::Malformed("truncated entry name".into()));
        }
        let name = bytes.copy_to_bytes(name_len);
        DirEntry::validate_name(&name)?;
        let cid = get_cid(&mut bytes)?;
        if bytes.remaining() < 9 {
            return Err(HashtreeError::Malformed("truncated entry tail".into()));
        }
        let size = bytes.get_u64();
        let type_tag = bytes.get_u8();
        let link_type = LinkType::from_tag(type_tag)
            .ok_or_else(|| HashtreeError::Malformed(format!("unknown link type {type_tag}")))?;
        entries.push(DirEntry {
            name,
            cid,
            size,
            link_type,
        });
    }
    for w in entries.windows(2) {
        if w[0].name >= w[1].name {
            return Err(HashtreeError::Malformed(
                "directory entries not strictly sorted by name".into(),
            ));
        }
    }
    Ok(Block::Dir(entries))
}

fn decode_chunked(mut bytes: Bytes) -> Result<Block> {
    let mut chunks = Vec::new();
    while bytes.has_remaining() {
        let cid = get_cid(&mut bytes)?;
        if bytes.remaining() < 8 {
            return Err(HashtreeError::Malformed("truncated chunk size".into()));
        }
        let size = bytes.get_u64();
        chunks.push(ChunkEntry { cid, size });
    }
    if chunks.is_empty() {
        return Err(HashtreeError::Malformed(
            "chunked node must have at least one chunk".into(),
        ));
    }
    Ok(Block::Chunked(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hash;

    fn entry(name: &str, byte: u8) -> DirEntry {
        DirEntry {
            name: Bytes::copy_from_slice(name.as_bytes()),
            cid: Cid::plain(Hash::from_bytes([byte; 32])),
            size: 3,
            link_type: LinkType::Blob,
        }
    }

    #[test]
    fn blob_round_trips() {
        let block = Block::Blob(Bytes::from_static(b"hello"));
        let encoded = encode_block(&block).unwrap();
        assert_eq!(decode_block(encoded).unwrap(), block);
    }

    #[test]
    fn dir_round_trips_and_requires_sort() {
        let block = Block::Dir(vec![entry("a", 1), entry("b", 2)]);
        let encoded = encode_block(&block).unwrap();
        assert_eq!(decode_block(encoded).unwrap(), block);

        let unsorted = Block::Dir(vec![entry("b", 2), entry("a", 1)]);
        assert!(encode_block(&unsorted).is_err());
    }

    #[test]
    fn dir_rejects_slash_in_name() {
        let block = Block::Dir(vec![entry("a/b", 1)]);
        assert!(encode_block(&block).is_err());
    }

    #[test]
    fn chunked_requires_non_empty() {
        assert!(encode_block(&Block::Chunked(vec![])).is_err());
    }

    #[test]
    fn encoding_is_order_preserving_for_dedup_via_caller_sort() {
        // The hash of the encoding must not depend on insertion order,
        // only on the final sorted entry list.
        let sorted = Block::Dir(vec![entry("a", 1), entry("b", 2)]);
        let also_sorted = Block::Dir(vec![entry("a", 1), entry("b", 2)]);
        assert_eq!(
            encode_block(&sorted).unwrap(),
            encode_block(&also_sorted).unwrap()
        );
    }
}
