use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use hashtree_store::BlockStore;

use crate::config::CliConfig;
use crate::helpers;

#[derive(Subcommand)]
pub enum BlockCmd {
    /// Writes a file's bytes as a block (chunked automatically if large) and prints its nhash
    Put {
        path: PathBuf,
        /// Encrypt the block under a freshly generated key
        #[arg(long)]
        encrypt: bool,
    },
    /// Resolves an nhash address and writes the block's bytes out
    Get {
        nhash: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Prints local store statistics
    Stats,
}

pub async fn run(data_dir: &Path, config: &CliConfig, cmd: BlockCmd) -> Result<()> {
    let store = helpers::open_store(data_dir, config).await?;

    match cmd {
        BlockCmd::Put { path, encrypt } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {path:?}"))?;
            let key = encrypt.then(hashtree_core::crypto::generate_root_key);
            let cid = hashtree_fs::write_file(
                &store,
                bytes.into(),
                key,
                config.tree.chunk_threshold,
                config.tree.chunk_size,
            )
            .await?;
            println!("{}", hashtree_core::nhash::encode(&cid));
        }
        BlockCmd::Get { nhash, out } => {
            let cid = helpers::parse_nhash(&nhash)?;
            let bytes = hashtree_fs::read_file(&store, cid).await?;
            write_output(out, &bytes).await?;
        }
        BlockCmd::Stats => {
            let stats = store.stats().await?;
            println!("blocks: {}", stats.block_count);
            println!("bytes:  {}", stats.total_bytes);
        }
    }

    Ok(())
}

pub(crate) async fn write_output(out: Option<PathBuf>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(path) => tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {path:?}")),
        None => {
            use std::io::Write;
            std::io::stdout().write_all(bytes).context("writing to stdout")
        }
    }
}
