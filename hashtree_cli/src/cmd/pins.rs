use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use hashtree_core::{PinContext, Pins, RegistryPinner};

use crate::config::CliConfig;
use crate::helpers;

#[derive(Subcommand)]
pub enum PinsCmd {
    /// Pins a block so garbage collection keeps it alive
    Pin {
        nhash: String,
        /// Tag identifying why this is pinned, so independent pinners don't clobber each other
        #[arg(long, default_value = "cli")]
        context: String,
    },
    /// Removes one pinner's pin from a block
    Unpin {
        nhash: String,
        #[arg(long, default_value = "cli")]
        context: String,
    },
    /// Lists the pin contexts currently holding a block alive
    List { nhash: String },
}

pub async fn run(data_dir: &Path, config: &CliConfig, cmd: PinsCmd) -> Result<()> {
    let registry = helpers::open_registry(data_dir, config)?;
    let pinner = RegistryPinner::new(registry);

    match cmd {
        PinsCmd::Pin { nhash, context } => {
            let cid = helpers::parse_nhash(&nhash)?;
            pinner.pin_hash(cid.hash, PinContext::named(context)).await?;
        }
        PinsCmd::Unpin { nhash, context } => {
            let cid = helpers::parse_nhash(&nhash)?;
            pinner.unpin_hash(cid.hash, PinContext::named(context)).await?;
        }
        PinsCmd::List { nhash } => {
            let cid = helpers::parse_nhash(&nhash)?;
            for context in pinner.get_pinners(cid.hash).await? {
                println!("{}", String::from_utf8_lossy(&context.0));
            }
        }
    }

    Ok(())
}
