use std::fs;
use std::path::{Path, PathBuf};

use fgvc_core::config::WeightConfig;
use fgvc_core::{checkpoint, FgvcModel, Result};

use crate::logger::Logger;

/// Creates `dir` (and parents) unless it already exists.
pub fn prepare_save_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Writes `SAVE_DIR/NAME` plus its config. Returns `None` when saving is
/// disabled by an empty name.
///
/// A save directory that cannot be created ends the process with status 1
/// after the logger is closed.
pub fn save_model(weight: &WeightConfig, model: &FgvcModel, logger: &mut dyn Logger) -> Result<Option<PathBuf>> {
    if weight.name.trim().is_empty() {
        return Ok(None);
    }
    let dir = Path::new(&weight.save_dir);
    if let Err(e) = prepare_save_dir(dir) {
        logger.log(&format!("Cannot create save dir under {}", dir.display()));
        log::error!("{}", e);
        logger.close();
        std::process::exit(1);
    }

    let path = dir.join(&weight.name);
    checkpoint::save(model.vs(), &model.cfg, &path)?;
    logger.log(&format!("Saving checkpoint to {}", path.display()));
    Ok(Some(path))
}
