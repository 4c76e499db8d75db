//! `dblpline release` - resolve release artifacts without downloading them

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use dblpline_core::SHARED_RUNTIME;
use dblpline_dblp::ReleaseCatalog;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// 1 = latest release, 2 = the one before, ...
    #[arg(long, default_value_t = 1)]
    pub skip: usize,

    /// Artifact extension to resolve
    #[arg(long, default_value = ".xml.gz")]
    pub extension: String,

    /// DBLP base URL (the listing lives at <base>/release)
    #[arg(long)]
    pub dblp_base_url: Option<String>,

    /// List every artifact in the release index
    #[arg(long)]
    pub all: bool,
}

pub fn run(args: ReleaseArgs, config: &Config) -> Result<()> {
    let base_url = args
        .dblp_base_url
        .unwrap_or_else(|| config.dblp.base_url.clone());
    anyhow::ensure!(args.skip >= 1, "--skip must be at least 1");
    let catalog = ReleaseCatalog::new(&base_url);

    SHARED_RUNTIME.handle().block_on(async {
        if args.all {
            let releases = catalog
                .list_releases()
                .await
                .with_context(|| format!("Failed to list {}", catalog.index_url()))?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Artifact").fg(Color::Cyan),
                    Cell::new("Kind").fg(Color::Cyan),
                    Cell::new("Release").fg(Color::Cyan),
                ]);
            for artifact in releases {
                table.add_row(vec![
                    Cell::new(artifact.filename()),
                    Cell::new(format!("{:?}", artifact.kind)),
                    Cell::new(artifact.release_date().unwrap_or("-")),
                ]);
            }
            eprintln!("\n{table}");
        }

        let artifact = catalog
            .resolve_latest(&args.extension, args.skip)
            .await
            .with_context(|| {
                format!(
                    "No release #{} with extension '{}' at {}",
                    args.skip,
                    args.extension,
                    catalog.index_url()
                )
            })?;
        println!("{}", artifact.url);
        Ok::<_, anyhow::Error>(())
    })
}
