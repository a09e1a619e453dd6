//! reduce-dataset: delete the `.png` images and `.txt` labels whose base names
//! appear in a removal list, anywhere under a dataset folder.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use yolorun_core::dataset;

/// Remove listed image/label pairs from a dataset tree
#[derive(Parser, Debug)]
#[command(name = "reduce-dataset", version, about, long_about = None)]
struct Args {
    /// Dataset root to walk
    #[arg(long)]
    folder: PathBuf,

    /// Text file with one base name per line
    #[arg(long)]
    remove_list: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter("info")
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.folder.is_dir(),
        "dataset folder does not exist: {}",
        args.folder.display()
    );
    let names = dataset::load_names(&args.remove_list)
        .with_context(|| format!("reading {}", args.remove_list.display()))?;

    let report = dataset::remove_listed_files(&args.folder, &names);

    println!("Total files removed: {}", report.removed.len());
    for path in &report.removed {
        println!("{}", path.display());
    }
    if !report.failed.is_empty() {
        eprintln!("Failed to remove {} file(s):", report.failed.len());
        for (path, reason) in &report.failed {
            eprintln!("  {}: {reason}", path.display());
        }
    }
    Ok(())
}
