use std::path::Path;

use anyhow::Result;

pub mod block;
pub mod gc;
pub mod pins;
pub mod registry;
pub mod tree;

pub async fn run(data_dir: &Path, command: crate::Commands) -> Result<()> {
    let config = crate::helpers::load_config(data_dir)?;

    match command {
        crate::Commands::Block { cmd } => block::run(data_dir, &config, cmd).await,
        crate::Commands::Tree { cmd } => tree::run(data_dir, &config, cmd).await,
        crate::Commands::Registry { cmd } => registry::run(data_dir, &config, cmd).await,
        crate::Commands::Pins { cmd } => pins::run(data_dir, &config, cmd).await,
        crate::Commands::Gc { dry_run, roots } => gc::run(data_dir, &config, dry_run, roots).await,
        crate::Commands::Config { .. } => unreachable!("handled before config load"),
    }
}
