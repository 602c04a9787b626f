use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use fgvc_core::{FgvcError, Result};

/// Unpacks `package` next to itself and returns where the content went.
///
/// Tar archives (`.tgz`, `.tar.gz`, `.tar`) go into a directory named after
/// the archive up to its first dot (`CUB_200_2011.tgz` → `CUB_200_2011/`).
/// A bare `.gz` file is decompressed beside the archive without its suffix.
pub fn extract(package: &Path) -> Result<PathBuf> {
    let file_name = package
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FgvcError::Config(format!("invalid archive path {:?}", package)))?;
    let parent = package.parent().unwrap_or_else(|| Path::new("."));

    if file_name.ends_with(".tgz") || file_name.ends_with(".tar.gz") {
        let target = parent.join(base_name(file_name));
        let reader = GzDecoder::new(BufReader::new(File::open(package)?));
        unpack_tar(reader, &target)?;
        Ok(target)
    } else if file_name.ends_with(".tar") {
        let target = parent.join(base_name(file_name));
        unpack_tar(BufReader::new(File::open(package)?), &target)?;
        Ok(target)
    } else if let Some(stem) = file_name.strip_suffix(".gz") {
        let target = parent.join(stem);
        let mut reader = GzDecoder::new(BufReader::new(File::open(package)?));
        let mut writer = File::create(&target)?;
        io::copy(&mut reader, &mut writer)?;
        tracing::info!(archive = %package.display(), target = %target.display(), "decompressed");
        Ok(target)
    } else {
        Err(FgvcError::Config(format!("unsupported archive format: {}", file_name)))
    }
}

fn base_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

fn unpack_tar<R: io::Read>(reader: R, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    tar::Archive::new(reader).unpack(target)?;
    tracing::info!(target = %target.display(), "extracted archive");
    Ok(())
}
