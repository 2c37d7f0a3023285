use std::{
    fs,
    io::Write,
    path::Path,
};

use anyhow::Context;
use clap::Subcommand;
use rand::RngCore;
use toml_edit::{DocumentMut, Item, Table};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the config file if it doesn't exist and generates an identity key
    Init,
}

impl CmdConfig {
    pub fn run(self, config_file: &Path, data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if config_file.exists() {
            fs::read_to_string(config_file)?
        } else {
            fs::create_dir_all(config_file.parent().unwrap())?;
            String::new()
        }
        .parse::<DocumentMut>()
        .context("could not parse config file")?;

        match self {
            Self::Init => {
                let identity_table = doc
                    .entry("identity")
                    .or_insert(Item::Table(Table::new()))
                    .as_table_mut()
                    .unwrap();
                let secret_key_file_name = identity_table
                    .get("secret_key_file")
                    .and_then(|v| v.as_str())
                    .unwrap_or("identity.secretkey")
                    .to_string();
                identity_table.insert("secret_key_file", secret_key_file_name.clone().into());

                doc.entry("store")
                    .or_insert(Item::Table(Table::new()))
                    .as_table_mut()
                    .unwrap()
                    .entry("path")
                    .or_insert("blocks".into());

                doc.entry("registry")
                    .or_insert(Item::Table(Table::new()))
                    .as_table_mut()
                    .unwrap()
                    .entry("path")
                    .or_insert("registry".into());

                let secret_key_file = data_dir.join(&secret_key_file_name);
                if !secret_key_file.exists() {
                    info!("generating a new identity key");
                    fs::create_dir_all(data_dir)?;
                    let mut bytes = [0u8; 32];
                    rand::rng().fill_bytes(&mut bytes);
                    fs::write(secret_key_file, bytes)?;
                }
            }
        }

        info!("writing config file {config_file:?}");
        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}
