use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use datasets::dataset::DatasetBuilder;
use datasets::{DatasetOptions, FgvcDataset, Split};
use fgvc_core::Registry;

/// Download and unpack a registered dataset ahead of training, then report
/// what each split contains.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registered dataset name
    #[arg(short, long, default_value = "CUB_200_2011")]
    name: String,
    /// Directory the archive is fetched into and extracted under
    #[arg(short, long)]
    root: PathBuf,
    /// Only inspect what is already on disk
    #[arg(long)]
    offline: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut registry: Registry<DatasetBuilder> = Registry::new("dataset");
    datasets::dataset::register_defaults(&mut registry)?;
    let builder = registry
        .get(&cli.name)
        .with_context(|| format!("known datasets: {}", registry.names().join(", ")))?;

    for (i, split) in [Split::Train, Split::Test].into_iter().enumerate() {
        let options = DatasetOptions {
            root: cli.root.clone(),
            split,
            // The first split triggers the download; the second reuses it.
            download: !cli.offline && i == 0,
        };
        let dataset = builder(&options).with_context(|| format!("loading {} split of {}", split, cli.name))?;
        println!(
            "{} [{}]: {} samples, {} categories",
            dataset.name(),
            split,
            dataset.len(),
            dataset.categories().len()
        );
        tracing::debug!(first = ?dataset.get(0).map(|s| &s.path), "first sample");
    }
    Ok(())
}
