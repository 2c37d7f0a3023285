use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hashtree_core::Cid;
use hashtree_registry::LocalSigner;
use hashtree_registry_redb::RedbRegistry;
use hashtree_store::FsBlockStore;

use crate::config::CliConfig;

pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "hashtree", "hashtree")
        .context("failed to determine a data directory for this platform")?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn load_config(data_dir: &Path) -> Result<CliConfig> {
    let path = config_path(data_dir);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {path:?} (run `hashtree config init` first)"))?;
    Ok(toml::from_str(&text)?)
}

fn resolve(data_dir: &Path, configured: &str) -> PathBuf {
    let configured = Path::new(configured);
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        data_dir.join(configured)
    }
}

pub async fn open_store(data_dir: &Path, config: &CliConfig) -> Result<FsBlockStore> {
    let path = resolve(data_dir, &config.store.path);
    Ok(FsBlockStore::open(path).await?)
}

pub fn open_registry(data_dir: &Path, config: &CliConfig) -> Result<RedbRegistry> {
    let path = resolve(data_dir, &config.registry.path);
    std::fs::create_dir_all(&path)?;
    Ok(RedbRegistry::open(path)?)
}

pub fn load_signer(data_dir: &Path, config: &CliConfig) -> Result<LocalSigner> {
    let path = resolve(data_dir, &config.identity.secret_key_file);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("reading identity key {path:?} (run `hashtree config init` first)"))?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .context("identity key file is not 32 bytes")?;
    Ok(LocalSigner::from_seed(seed))
}

pub fn parse_nhash(s: &str) -> Result<Cid> {
    Ok(hashtree_core::nhash::decode(s.trim())?)
}

pub fn parse_key_hex(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim()).context("failed to decode hex key")?;
    bytes
        .as_slice()
        .try_into()
        .context("expected a 32-byte (64 hex character) key")
}
