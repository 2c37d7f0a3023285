use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Subcommand;
use hashtree_core::{Hash, LinkType, crypto};

use crate::cmd::block::write_output;
use crate::config::CliConfig;
use crate::helpers;

#[derive(Subcommand)]
pub enum TreeCmd {
    /// Creates an empty directory and prints its nhash
    New,
    /// Lists the entries of a directory
    Ls {
        root: String,
        #[arg(default_value = "")]
        path: String,
    },
    /// Prints a file's contents to stdout (or a file with --out)
    Cat {
        root: String,
        path: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Writes a file into a tree, printing the new root nhash
    Set {
        root: String,
        /// Slash-separated path to the new entry, e.g. docs/readme.txt
        path: String,
        file: PathBuf,
        #[arg(long)]
        encrypt: bool,
    },
    /// Removes an entry from a tree, printing the new root nhash
    Rm { root: String, path: String },
}

pub async fn run(data_dir: &Path, config: &CliConfig, cmd: TreeCmd) -> Result<()> {
    let store = helpers::open_store(data_dir, config).await?;

    match cmd {
        TreeCmd::New => {
            let cid = hashtree_fs::put_directory(&store, Vec::new(), None).await?;
            println!("{}", hashtree_core::nhash::encode(&cid));
        }
        TreeCmd::Ls { root, path } => {
            let root = helpers::parse_nhash(&root)?;
            let (cid, link_type) = hashtree_fs::read_path(&store, root, path.as_bytes()).await?;
            if link_type != LinkType::Dir {
                bail!("{path} is not a directory");
            }
            for entry in hashtree_fs::list_directory(&store, cid).await? {
                let kind = match entry.link_type {
                    LinkType::Dir => "dir ",
                    LinkType::Blob => "file",
                };
                println!(
                    "{kind}  {:>10}  {}  {}",
                    entry.size,
                    hashtree_core::nhash::encode(&entry.cid),
                    String::from_utf8_lossy(&entry.name),
                );
            }
        }
        TreeCmd::Cat { root, path, out } => {
            let root = helpers::parse_nhash(&root)?;
            let (cid, link_type) = hashtree_fs::read_path(&store, root, path.as_bytes()).await?;
            if link_type != LinkType::Blob {
                bail!("{path} is not a file");
            }
            let bytes = hashtree_fs::read_file(&store, cid).await?;
            write_output(out, &bytes).await?;
        }
        TreeCmd::Set {
            root,
            path,
            file,
            encrypt,
        } => {
            let root = helpers::parse_nhash(&root)?;
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| anyhow::anyhow!("reading {file:?}: {e}"))?;
            let size = bytes.len() as u64;
            let (parent_path, name) = split_parent(&path)?;
            let key = if encrypt {
                let (parent_cid, parent_type) =
                    hashtree_fs::read_path(&store, root, parent_path.as_bytes()).await?;
                if parent_type != LinkType::Dir {
                    bail!("{parent_path} is not a directory");
                }
                let parent_key = parent_cid
                    .key
                    .context("--encrypt requires the parent directory itself to be encrypted")?;
                Some(crypto::derive_child_key(&parent_key, &Hash::new(&bytes)))
            } else {
                None
            };
            let file_cid = hashtree_fs::write_file(
                &store,
                Bytes::from(bytes),
                key,
                config.tree.chunk_threshold,
                config.tree.chunk_size,
            )
            .await?;
            let new_root = hashtree_fs::set_entry(
                &store,
                root,
                parent_path.as_bytes(),
                Bytes::copy_from_slice(name.as_bytes()),
                file_cid,
                size,
                LinkType::Blob,
            )
            .await?;
            println!("{}", hashtree_core::nhash::encode(&new_root));
        }
        TreeCmd::Rm { root, path } => {
            let root = helpers::parse_nhash(&root)?;
            let (parent_path, name) = split_parent(&path)?;
            let new_root =
                hashtree_fs::remove_entry(&store, root, parent_path.as_bytes(), name.as_bytes()).await?;
            println!("{}", hashtree_core::nhash::encode(&new_root));
        }
    }

    Ok(())
}

fn split_parent(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => Ok((parent, name)),
        Some(_) => bail!("path must not end in a slash"),
        None if !path.is_empty() => Ok(("", path)),
        None => bail!("path must not be empty"),
    }
}
