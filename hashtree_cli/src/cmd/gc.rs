use std::path::Path;

use anyhow::Result;
use hashtree_core::RegistryPinner;
use hashtree_store::gc::{collect_reachable, gc_store};

use crate::config::CliConfig;
use crate::helpers;

pub async fn run(data_dir: &Path, config: &CliConfig, dry_run: bool, roots: Vec<String>) -> Result<()> {
    let store = helpers::open_store(data_dir, config).await?;
    let registry = helpers::open_registry(data_dir, config)?;
    let pinner = RegistryPinner::new(registry);

    let cids = roots
        .iter()
        .map(|s| helpers::parse_nhash(s))
        .collect::<Result<Vec<_>>>()?;
    let reachable = collect_reachable(&store, cids).await?;
    let report = gc_store(&store, &reachable, &pinner, dry_run).await?;

    println!("total blocks:     {}", report.total);
    println!("kept (pinned):    {}", report.kept_by_pins);
    println!("kept (reachable): {}", report.kept_by_reachability);
    println!("kept (recent):    {}", report.kept_recently_inserted);
    println!(
        "{}: {}",
        if dry_run { "would delete" } else { "deleted" },
        report.deleted
    );

    Ok(())
}
