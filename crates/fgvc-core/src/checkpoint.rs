use std::fs;
use std::path::{Path, PathBuf};
use tch::nn;

use crate::config::ModelConfig;
use crate::error::Result;

/// Writes the var store to `path` and the model config beside it as
/// `<path>.json`.
pub fn save<P: AsRef<Path>>(vs: &nn::VarStore, cfg: &ModelConfig, path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    vs.save(path)?;

    let config_path = config_path(path);
    fs::write(&config_path, serde_json::to_string_pretty(cfg)?)?;
    log::debug!("wrote model config to {:?}", config_path);
    Ok(path.to_path_buf())
}

/// Restores every variable of `vs` from a file written by [`save`].
pub fn load<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    vs.load(path.as_ref())?;
    log::info!("restored weights from {:?}", path.as_ref());
    Ok(())
}

/// Reads the model config stored next to a checkpoint.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ModelConfig> {
    let content = fs::read_to_string(config_path(path.as_ref()))?;
    Ok(serde_json::from_str(&content)?)
}

fn config_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}
