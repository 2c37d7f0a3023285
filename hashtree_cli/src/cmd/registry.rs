use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use bytes::Bytes;
use clap::{Subcommand, ValueEnum};
use hashtree_core::RecordKey;
use hashtree_core::crypto::Visibility;
use hashtree_registry::{KeyRecovery, PublishOptions, Resolver, Signer};

use crate::config::CliConfig;
use crate::helpers;
use crate::local_network::{LocalOnlyPublisher, LocalOnlySubscription};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum VisibilityArg {
    Public,
    Unlisted,
    Private,
}

impl From<VisibilityArg> for Visibility {
    fn from(value: VisibilityArg) -> Self {
        match value {
            VisibilityArg::Public => Visibility::Public,
            VisibilityArg::Unlisted => Visibility::Unlisted,
            VisibilityArg::Private => Visibility::Private,
        }
    }
}

#[derive(Subcommand)]
pub enum RegistryCmd {
    /// Publishes a root for a named tree under this node's identity
    Publish {
        tree_name: String,
        root: String,
        #[arg(long, value_enum, default_value_t = VisibilityArg::Public)]
        visibility: VisibilityArg,
        /// Required with --visibility unlisted; a 32-byte hex link key
        #[arg(long)]
        link_key: Option<String>,
    },
    /// Resolves the latest known root for a signer's tree
    Resolve {
        pubkey: String,
        /// Hex link key, for an unlisted tree
        #[arg(long)]
        link_key: Option<String>,
    },
    /// Publishes a tombstone for a named tree
    Delete { tree_name: String },
}

pub async fn run(data_dir: &Path, config: &CliConfig, cmd: RegistryCmd) -> Result<()> {
    let cache = Arc::new(helpers::open_registry(data_dir, config)?);
    let resolver = Resolver::new(
        cache,
        Arc::new(LocalOnlyPublisher),
        Arc::new(LocalOnlySubscription::default()),
        config.tree.publish_throttle_ms,
    );
    let signer = helpers::load_signer(data_dir, config)?;

    match cmd {
        RegistryCmd::Publish {
            tree_name,
            root,
            visibility,
            link_key,
        } => {
            let cid = helpers::parse_nhash(&root)?;
            let link_key = link_key.map(|s| helpers::parse_key_hex(&s)).transpose()?;
            let visibility: Visibility = visibility.into();
            if visibility == Visibility::Unlisted && link_key.is_none() {
                bail!("--visibility unlisted requires --link-key");
            }
            resolver
                .publish(
                    &signer,
                    Bytes::from(tree_name.clone().into_bytes()),
                    cid,
                    PublishOptions { visibility, link_key },
                    false,
                )
                .await?;
            println!("published {tree_name:?} -> {root}");
        }
        RegistryCmd::Resolve { pubkey, link_key } => {
            let pubkey = helpers::parse_key_hex(&pubkey)?;
            let key = RecordKey::PublicKeyEd25519(pubkey);
            let recovery = KeyRecovery {
                link_key: link_key.map(|s| helpers::parse_key_hex(&s)).transpose()?,
                self_encryption_key: Some(signer.self_encryption_key()),
            };
            match resolver.resolve(&key, &recovery).await? {
                Some(entry) => match entry.cid {
                    Some(cid) => println!("{}", hashtree_core::nhash::encode(&cid)),
                    None => println!("(deleted)"),
                },
                None => bail!("no record found for that key"),
            }
        }
        RegistryCmd::Delete { tree_name } => {
            resolver.delete(&signer, Bytes::from(tree_name.into_bytes())).await?;
            println!("published tombstone");
        }
    }

    Ok(())
}
