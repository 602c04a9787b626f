//! Generic `root/<split>/<category>/<image>` layout.

use std::fs;
use std::path::{Path, PathBuf};

use fgvc_core::{FgvcError, Result};

use crate::dataset::{CategoryIndex, DatasetOptions, FgvcDataset, Sample, Split};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Debug)]
pub struct ImageFolder {
    root: PathBuf,
    categories: CategoryIndex,
    samples: Vec<Sample>,
}

pub fn build(options: &DatasetOptions) -> Result<Box<dyn FgvcDataset>> {
    if options.download {
        tracing::warn!("image_folder has no download source; using {:?} as is", options.root);
    }
    Ok(Box::new(ImageFolder::new(&options.root, options.split)?))
}

impl ImageFolder {
    /// Categories are the sorted directory names under `root/<split>`.
    pub fn new<P: AsRef<Path>>(root: P, split: Split) -> Result<Self> {
        let root = root.as_ref().join(split.as_str());
        if !root.is_dir() {
            return Err(FgvcError::Config(format!("{:?} is not a directory", root)));
        }

        let mut class_dirs = list_dir(&root)?;
        class_dirs.retain(|p| p.is_dir());
        class_dirs.sort();

        let mut categories = CategoryIndex::new();
        let mut samples = Vec::new();
        for (index, dir) in class_dirs.iter().enumerate() {
            let name = dir
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| FgvcError::Config(format!("non UTF-8 category directory {:?}", dir)))?;
            categories.insert(name, index as i64)?;

            let mut images = list_dir(dir)?;
            images.retain(|p| p.is_file() && is_image(p));
            images.sort();
            samples.extend(images.into_iter().map(|path| Sample {
                path,
                label: index as i64,
            }));
        }

        tracing::info!(root = %root.display(), samples = samples.len(), categories = categories.len(), "loaded image folder");
        Ok(Self {
            root,
            categories,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Entry paths of `dir`; an unreadable entry is an error.
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        paths.push(entry?.path());
    }
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl FgvcDataset for ImageFolder {
    fn name(&self) -> &str {
        "image_folder"
    }

    fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn categories(&self) -> &CategoryIndex {
        &self.categories
    }
}
