//! The tree engine (C4): copy-on-write reads and writes over a content tree,
//! expressed as free functions over `&dyn BlockStore`. There is no actor, no
//! background task, and no per-tree mutex — every operation here is pure
//! given its store and arguments, rather than a handle owning and mutating
//! shared directory state.
//!
//! Encryption keys travel on `Cid` (stored inline in directory entries), so
//! reads never need a side-channel key argument. A directory's own
//! encryption key is fixed when that directory is first created — derived
//! from its parent's key and its own plaintext hash at that moment — and
//! does not change on later edits to its contents, only its hash does.
//! This is what lets `set_entry` rewrite ancestors bottom-up without a
//! circular dependency between a block's key and its own plaintext.

use bytes::Bytes;
use hashtree_core::block::{decode_block, encode_block};
use hashtree_core::{Block, ChunkEntry, Cid, DirEntry, Hash, HashtreeError, LinkType, Result, crypto};
use hashtree_store::BlockStore;

/// Splits a `/`-joined path into its segments, ignoring empty segments so
/// leading/trailing/doubled slashes don't produce spurious path components.
fn split_path(path: &[u8]) -> Vec<&[u8]> {
    path.split(|&b| b == b'/').filter(|s| !s.is_empty()).collect()
}

fn open_block(sealed: &Bytes, cid: Cid) -> Result<Bytes> {
    match cid.key {
        Some(key) => crypto::open(sealed, &key, cid.hash),
        None => Ok(sealed.clone()),
    }
}

async fn load_dir(store: &dyn BlockStore, cid: Cid) -> Result<Vec<DirEntry>> {
    let sealed = store.get(cid.hash).await?;
    let plaintext = open_block(&sealed, cid)?;
    match decode_block(plaintext)? {
        Block::Dir(entries) => Ok(entries),
        Block::Blob(_) | Block::Chunked(_) => Err(HashtreeError::NotADirectory),
    }
}

fn find_entry<'a>(entries: &'a [DirEntry], name: &[u8]) -> Option<&'a DirEntry> {
    entries.iter().find(|e| e.name.as_ref() == name)
}

/// Walks `path` from `root`, returning the CID and link type of whatever it
/// resolves to. An empty path resolves to `root` itself.
pub async fn read_path(store: &dyn BlockStore, root: Cid, path: &[u8]) -> Result<(Cid, LinkType)> {
    let mut current = root;
    let mut current_type = LinkType::Dir;

    for segment in split_path(path) {
        if current_type != LinkType::Dir {
            return Err(HashtreeError::NotADirectory);
        }
        let entries = load_dir(store, current).await?;
        let entry = find_entry(&entries, segment)
            .ok_or_else(|| HashtreeError::NotFound(String::from_utf8_lossy(segment).into()))?;
        current = entry.cid;
        current_type = entry.link_type;
    }

    Ok((current, current_type))
}

/// Decodes a directory block and returns its entries in stored (sorted)
/// order.
pub async fn list_directory(store: &dyn BlockStore, cid: Cid) -> Result<Vec<DirEntry>> {
    load_dir(store, cid).await
}

/// Reads a file node's full contents, concatenating chunks in order if
/// chunked.
pub async fn read_file(store: &dyn BlockStore, cid: Cid) -> Result<Bytes> {
    let sealed = store.get(cid.hash).await?;
    let plaintext = open_block(&sealed, cid)?;
    match decode_block(plaintext)? {
        Block::Blob(bytes) => Ok(bytes),
        Block::Chunked(chunks) => {
            let mut out = Vec::new();
            for chunk in chunks {
                let sealed = store.get(chunk.cid.hash).await?;
                let plaintext = open_block(&sealed, chunk.cid)?;
                match decode_block(plaintext)? {
                    Block::Blob(bytes) => out.extend_from_slice(&bytes),
                    Block::Dir(_) | Block::Chunked(_) => {
                        return Err(HashtreeError::Malformed(
                            "chunk entry does not reference a blob block".into(),
                        ));
                    }
                }
            }
            Ok(Bytes::from(out))
        }
        Block::Dir(_) => Err(HashtreeError::Malformed(
            "expected a file node, found a directory".into(),
        )),
    }
}

/// Seals `plaintext` under `key` (stores it unencrypted when `key` is
/// `None`) and writes it to `store`, returning the resulting `Cid`.
async fn seal_and_put(
    store: &dyn BlockStore,
    plaintext: &[u8],
    key: Option<[u8; 32]>,
) -> Result<Cid> {
    let (sealed, hash) = crypto::seal_and_hash(plaintext, key.as_ref())?;
    store.put(sealed).await?;
    Ok(Cid { hash, key })
}

/// Encodes `bytes` as a file node under `key`, splitting into fixed-size
/// chunks once `bytes` exceeds `chunk_threshold`. Each chunk's own key is
/// derived from `key` (the file node's key) and the chunk's plaintext
/// hash, same as any other parent/child pair in the tree.
pub async fn write_file(
    store: &dyn BlockStore,
    bytes: Bytes,
    key: Option<[u8; 32]>,
    chunk_threshold: u64,
    chunk_size: u64,
) -> Result<Cid> {
    if bytes.len() as u64 <= chunk_threshold {
        let plaintext = encode_block(&Block::Blob(bytes))?;
        return seal_and_put(store, &plaintext, key).await;
    }

    let chunk_size = (chunk_size.max(1)) as usize;
    let mut chunks = Vec::new();
    for piece in bytes.chunks(chunk_size) {
        let plaintext = encode_block(&Block::Blob(Bytes::copy_from_slice(piece)))?;
        let child_key = key.map(|k| crypto::derive_child_key(&k, &Hash::new(&plaintext)));
        let cid = seal_and_put(store, &plaintext, child_key).await?;
        chunks.push(ChunkEntry {
            cid,
            size: piece.len() as u64,
        });
    }
    let plaintext = encode_block(&Block::Chunked(chunks))?;
    seal_and_put(store, &plaintext, key).await
}

/// Sorts, validates, encodes, and writes a directory node under `key`.
pub async fn put_directory(
    store: &dyn BlockStore,
    mut entries: Vec<DirEntry>,
    key: Option<[u8; 32]>,
) -> Result<Cid> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for w in entries.windows(2) {
        if w[0].name == w[1].name {
            return Err(HashtreeError::DuplicateName);
        }
    }
    let plaintext = encode_block(&Block::Dir(entries))?;
    seal_and_put(store, &plaintext, key).await
}

/// Cheap directory check: reads the block and inspects its type tag.
pub async fn is_directory(store: &dyn BlockStore, cid: Cid) -> Result<bool> {
    let sealed = store.get(cid.hash).await?;
    let plaintext = open_block(&sealed, cid)?;
    Ok(matches!(decode_block(plaintext)?, Block::Dir(_)))
}

/// One directory along the path from the tree root down to (and
/// including) the directory being mutated.
struct Level {
    entries: Vec<DirEntry>,
    /// This directory's own encryption key, fixed at its creation.
    own_key: Option<[u8; 32]>,
    /// The name by which this directory's *parent* refers to it. `None`
    /// only for the root, which has no parent entry to rewrite.
    name_in_parent: Option<Bytes>,
}

/// Walks from `root` down to the directory at `parent_path`, returning the
/// chain of directories from root to that directory (inclusive). Fails with
/// `NotFound` if any path segment is missing, `NotADirectory` if a
/// non-terminal segment resolves to a file.
async fn walk_ancestors(store: &dyn BlockStore, root: Cid, parent_path: &[u8]) -> Result<Vec<Level>> {
    let mut chain = vec![Level {
        entries: load_dir(store, root).await?,
        own_key: root.key,
        name_in_parent: None,
    }];

    for segment in split_path(parent_path) {
        let entries = &chain.last().expect("chain is never empty").entries;
        let entry = find_entry(entries, segment)
            .ok_or_else(|| HashtreeError::NotFound(String::from_utf8_lossy(segment).into()))?;
        if entry.link_type != LinkType::Dir {
            return Err(HashtreeError::NotADirectory);
        }
        let child_cid = entry.cid;
        let child_entries = load_dir(store, child_cid).await?;
        chain.push(Level {
            entries: child_entries,
            own_key: child_cid.key,
            name_in_parent: Some(Bytes::copy_from_slice(segment)),
        });
    }

    Ok(chain)
}

fn upsert_entry(entries: &mut Vec<DirEntry>, name: Bytes, cid: Cid, size: u64, link_type: LinkType) {
    match entries.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.cid = cid;
            existing.size = size;
            existing.link_type = link_type;
        }
        None => entries.push(DirEntry {
            name,
            cid,
            size,
            link_type,
        }),
    }
}

/// Rewrites every ancestor in `chain` above the already-mutated deepest
/// level, re-pointing each one's entry for its child at `new_cid`, and
/// returns the resulting new root CID. `chain` must already have its
/// deepest (target) level popped and resealed into `new_cid`.
async fn rewrite_ancestors(
    store: &dyn BlockStore,
    mut chain: Vec<Level>,
    mut new_cid: Cid,
    mut name_in_parent: Option<Bytes>,
) -> Result<Cid> {
    while let Some(mut ancestor) = chain.pop() {
        let this_name = name_in_parent
            .take()
            .expect("every non-root level has a name_in_parent");
        upsert_entry(&mut ancestor.entries, this_name, new_cid, 0, LinkType::Dir);
        name_in_parent = ancestor.name_in_parent.clone();
        new_cid = put_directory(store, ancestor.entries, ancestor.own_key).await?;
    }
    Ok(new_cid)
}

/// Resolves `parent_path` from `root`, inserts or replaces the entry named
/// `name` with `(child_cid, size, link_type)`, and rewrites every ancestor
/// back up to a new root CID.
#[allow(clippy::too_many_arguments)]
pub async fn set_entry(
    store: &dyn BlockStore,
    root: Cid,
    parent_path: &[u8],
    name: Bytes,
    child_cid: Cid,
    size: u64,
    link_type: LinkType,
) -> Result<Cid> {
    DirEntry::validate_name(&name)?;
    let mut chain = walk_ancestors(store, root, parent_path).await?;
    let mut target = chain.pop().expect("chain is never empty");
    upsert_entry(&mut target.entries, name, child_cid, size, link_type);
    let new_cid = put_directory(store, target.entries, target.own_key).await?;
    rewrite_ancestors(store, chain, new_cid, target.name_in_parent).await
}

/// Resolves `parent_path` from `root`, removes the entry named `name`
/// (failing with `NotFound` if absent), and rewrites every ancestor back up
/// to a new root CID. An emptied intermediate directory is retained, not
/// collapsed out of the tree.
pub async fn remove_entry(
    store: &dyn BlockStore,
    root: Cid,
    parent_path: &[u8],
    name: &[u8],
) -> Result<Cid> {
    let mut chain = walk_ancestors(store, root, parent_path).await?;
    let mut target = chain.pop().expect("chain is never empty");
    let before = target.entries.len();
    target.entries.retain(|e| e.name.as_ref() != name);
    if target.entries.len() == before {
        return Err(HashtreeError::NotFound(String::from_utf8_lossy(name).into()));
    }
    let new_cid = put_directory(store, target.entries, target.own_key).await?;
    rewrite_ancestors(store, chain, new_cid, target.name_in_parent).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashtree_store::MemoryBlockStore;

    fn entry(name: &str, cid: Cid, link_type: LinkType) -> DirEntry {
        DirEntry {
            name: Bytes::copy_from_slice(name.as_bytes()),
            cid,
            size: 0,
            link_type,
        }
    }

    async fn empty_root(store: &dyn BlockStore) -> Cid {
        put_directory(store, Vec::new(), None).await.unwrap()
    }

    #[tokio::test]
    async fn write_file_below_threshold_is_a_single_blob() {
        let store = MemoryBlockStore::new();
        let cid = write_file(&store, Bytes::from_static(b"small"), None, 1024, 256)
            .await
            .unwrap();
        assert_eq!(read_file(&store, cid).await.unwrap(), Bytes::from_static(b"small"));
        assert!(!is_directory(&store, cid).await.unwrap());
    }

    #[tokio::test]
    async fn write_file_above_threshold_chunks_and_reassembles() {
        let store = MemoryBlockStore::new();
        let data = Bytes::from(vec![7u8; 10_000]);
        let cid = write_file(&store, data.clone(), None, 1024, 4096).await.unwrap();
        let round_tripped = read_file(&store, cid).await.unwrap();
        assert_eq!(round_tripped, data);
    }

    #[tokio::test]
    async fn zero_byte_file_round_trips() {
        let store = MemoryBlockStore::new();
        let cid = write_file(&store, Bytes::new(), None, 1024, 256).await.unwrap();
        assert_eq!(read_file(&store, cid).await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn put_directory_sorts_regardless_of_input_order() {
        let store = MemoryBlockStore::new();
        let a = write_file(&store, Bytes::from_static(b"a"), None, 1024, 256).await.unwrap();
        let b = write_file(&store, Bytes::from_static(b"b"), None, 1024, 256).await.unwrap();
        let forward = put_directory(
            &store,
            vec![entry("a", a, LinkType::Blob), entry("b", b, LinkType::Blob)],
            None,
        )
        .await
        .unwrap();
        let reversed = put_directory(
            &store,
            vec![entry("b", b, LinkType::Blob), entry("a", a, LinkType::Blob)],
            None,
        )
        .await
        .unwrap();
        assert_eq!(forward.hash, reversed.hash);
    }

    #[tokio::test]
    async fn put_directory_rejects_duplicate_names() {
        let store = MemoryBlockStore::new();
        let a = write_file(&store, Bytes::from_static(b"a"), None, 1024, 256).await.unwrap();
        let err = put_directory(
            &store,
            vec![entry("x", a, LinkType::Blob), entry("x", a, LinkType::Blob)],
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HashtreeError::DuplicateName));
    }

    #[tokio::test]
    async fn set_entry_then_read_path_round_trips() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store).await;
        let file = write_file(&store, Bytes::from_static(b"hello"), None, 1024, 256)
            .await
            .unwrap();
        let new_root = set_entry(
            &store,
            root,
            b"",
            Bytes::from_static(b"hello.txt"),
            file,
            5,
            LinkType::Blob,
        )
        .await
        .unwrap();
        let (resolved, link_type) = read_path(&store, new_root, b"hello.txt").await.unwrap();
        assert_eq!(resolved.hash, file.hash);
        assert_eq!(link_type, LinkType::Blob);
    }

    #[tokio::test]
    async fn copy_on_write_preserves_sibling_and_old_root() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store).await;
        let sibling = write_file(&store, Bytes::from_static(b"sibling"), None, 1024, 256)
            .await
            .unwrap();
        let root_with_sibling = set_entry(
            &store,
            root,
            b"",
            Bytes::from_static(b"s.txt"),
            sibling,
            7,
            LinkType::Blob,
        )
        .await
        .unwrap();

        let original = write_file(&store, Bytes::from_static(b"v1"), None, 1024, 256)
            .await
            .unwrap();
        let root_v1 = set_entry(
            &store,
            root_with_sibling,
            b"",
            Bytes::from_static(b"r.txt"),
            original,
            2,
            LinkType::Blob,
        )
        .await
        .unwrap();

        let updated = write_file(&store, Bytes::from_static(b"v2"), None, 1024, 256)
            .await
            .unwrap();
        let root_v2 = set_entry(
            &store,
            root_v1,
            b"",
            Bytes::from_static(b"r.txt"),
            updated,
            2,
            LinkType::Blob,
        )
        .await
        .unwrap();

        assert_ne!(root_v1.hash, root_v2.hash);
        let (old_file, _) = read_path(&store, root_v1, b"r.txt").await.unwrap();
        assert_eq!(read_file(&store, old_file).await.unwrap(), Bytes::from_static(b"v1"));
        let (new_file, _) = read_path(&store, root_v2, b"r.txt").await.unwrap();
        assert_eq!(read_file(&store, new_file).await.unwrap(), Bytes::from_static(b"v2"));
        let (sibling_in_v1, _) = read_path(&store, root_v1, b"s.txt").await.unwrap();
        let (sibling_in_v2, _) = read_path(&store, root_v2, b"s.txt").await.unwrap();
        assert_eq!(sibling_in_v1.hash, sibling_in_v2.hash);
    }

    #[tokio::test]
    async fn set_entry_into_nested_path_rewrites_every_ancestor() {
        let store = MemoryBlockStore::new();
        let leaf_dir = empty_root(&store).await;
        let mid_root = set_entry(
            &store,
            empty_root(&store).await,
            b"",
            Bytes::from_static(b"q"),
            leaf_dir,
            0,
            LinkType::Dir,
        )
        .await
        .unwrap();
        let root = set_entry(
            &store,
            empty_root(&store).await,
            b"",
            Bytes::from_static(b"p"),
            mid_root,
            0,
            LinkType::Dir,
        )
        .await
        .unwrap();

        let file = write_file(&store, Bytes::from_static(b"deep"), None, 1024, 256)
            .await
            .unwrap();
        let new_root = set_entry(
            &store,
            root,
            b"p/q",
            Bytes::from_static(b"r.txt"),
            file,
            4,
            LinkType::Blob,
        )
        .await
        .unwrap();

        let (resolved, _) = read_path(&store, new_root, b"p/q/r.txt").await.unwrap();
        assert_eq!(resolved.hash, file.hash);
    }

    #[tokio::test]
    async fn remove_entry_then_set_entry_restores_structural_equality() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store).await;
        let file = write_file(&store, Bytes::from_static(b"x"), None, 1024, 256)
            .await
            .unwrap();
        let with_entry = set_entry(
            &store,
            root,
            b"",
            Bytes::from_static(b"x.txt"),
            file,
            1,
            LinkType::Blob,
        )
        .await
        .unwrap();
        let removed = remove_entry(&store, with_entry, b"", b"x.txt").await.unwrap();
        assert_eq!(removed.hash, root.hash);
    }

    #[tokio::test]
    async fn remove_entry_retains_emptied_intermediate_directory() {
        let store = MemoryBlockStore::new();
        let leaf_dir = empty_root(&store).await;
        let root = set_entry(
            &store,
            empty_root(&store).await,
            b"",
            Bytes::from_static(b"p"),
            leaf_dir,
            0,
            LinkType::Dir,
        )
        .await
        .unwrap();
        let file = write_file(&store, Bytes::from_static(b"y"), None, 1024, 256)
            .await
            .unwrap();
        let with_file = set_entry(&store, root, b"p", Bytes::from_static(b"y.txt"), file, 1, LinkType::Blob)
            .await
            .unwrap();
        let without_file = remove_entry(&store, with_file, b"p", b"y.txt").await.unwrap();

        let (p_cid, p_type) = read_path(&store, without_file, b"p").await.unwrap();
        assert_eq!(p_type, LinkType::Dir);
        let entries = list_directory(&store, p_cid).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn reading_missing_path_segment_is_not_found() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store).await;
        let err = read_path(&store, root, b"nope").await.unwrap_err();
        assert!(matches!(err, HashtreeError::NotFound(_)));
    }

    #[tokio::test]
    async fn writing_under_a_file_fails_with_not_a_directory() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store).await;
        let file = write_file(&store, Bytes::from_static(b"x"), None, 1024, 256)
            .await
            .unwrap();
        let with_file = set_entry(&store, root, b"", Bytes::from_static(b"f"), file, 1, LinkType::Blob)
            .await
            .unwrap();
        let err = read_path(&store, with_file, b"f/g").await.unwrap_err();
        assert!(matches!(err, HashtreeError::NotADirectory));
    }
}
