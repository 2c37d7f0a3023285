use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;

mod cmd;
mod config;
mod helpers;
mod init_config;
mod local_network;

use init_config::CmdConfig;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// data directory for config, identity, and local stores
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the CLI's config file and identity
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Read and write individual content-addressed blocks
    Block {
        #[command(subcommand)]
        cmd: cmd::block::BlockCmd,
    },
    /// Read and write directory trees
    Tree {
        #[command(subcommand)]
        cmd: cmd::tree::TreeCmd,
    },
    /// Publish and resolve signed pointer events
    Registry {
        #[command(subcommand)]
        cmd: cmd::registry::RegistryCmd,
    },
    /// Pin and unpin blocks to keep them alive across garbage collection
    Pins {
        #[command(subcommand)]
        cmd: cmd::pins::PinsCmd,
    },
    /// Sweep unreachable, unpinned blocks out of the local store
    Gc {
        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
        /// Root nhash addresses to keep reachable (repeatable)
        #[arg(long = "root", value_name = "NHASH")]
        roots: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => helpers::default_data_dir()?,
    };

    match cli.cmd {
        Commands::Config { cmd } => {
            let config_file = helpers::config_path(&data_dir);
            cmd.run(&config_file, &data_dir)
        }
        other => cmd::run(&data_dir, other).await,
    }
}
