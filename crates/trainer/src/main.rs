use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use fgvc_core::RootConfig;
use trainer::{Registries, Trainer};

#[derive(Parser)]
#[command(author, version, about = "Train and evaluate fine-grained classifiers from a YAML config", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, evaluating and checkpointing after every epoch
    Train {
        /// Run configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Evaluate the weights named by WEIGHT.LOAD on the test split
    Eval {
        /// Run configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print every registered component name
    List,
}

fn load_config(path: &Path) -> Result<RootConfig> {
    RootConfig::from_file(path).with_context(|| format!("reading config {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let registries = Registries::with_defaults()?;

    match cli.command {
        Commands::Train { config } => {
            let cfg = load_config(&config)?;
            let mut trainer = Trainer::new(cfg, &registries)?;
            let saved = trainer.train()?;
            trainer.close();
            match saved {
                Some(path) => println!("Training complete! Best weights in {}", path.display()),
                None => println!("Training complete!"),
            }
        }
        Commands::Eval { config } => {
            let cfg = load_config(&config)?;
            if cfg.weight.load.is_none() {
                anyhow::bail!("WEIGHT.LOAD must name the checkpoint to evaluate");
            }
            let mut trainer = Trainer::new(cfg, &registries)?;
            let results = trainer.evaluate()?;
            trainer.interpret_first_batch()?;
            trainer.close();
            for (name, value) in results {
                println!("{}: {:.4}", name, value);
            }
        }
        Commands::List => {
            for (category, names) in registries.catalog() {
                println!("{}: {}", category, names.join(", "));
            }
        }
    }
    Ok(())
}
