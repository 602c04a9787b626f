//! Caltech-UCSD Birds-200-2011.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use fgvc_core::{FgvcError, Result};

use crate::dataset::{CategoryIndex, DatasetOptions, FgvcDataset, Sample, Split};
use crate::{download, extract};

pub const NAME: &str = "Caltech-UCSD Birds-200-2011";
pub const LINK: &str = "http://www.vision.caltech.edu/datasets/cub_200_2011/";
pub const DOWNLOAD_LINK: &str = "https://data.caltech.edu/records/65de6-vp158/files/CUB_200_2011.tgz?download=1";

const ARCHIVE: &str = "CUB_200_2011.tgz";
const EXTRACTED_DIR: &str = "CUB_200_2011";
const CLASSES_FILE: &str = "CUB_200_2011/CUB_200_2011/classes.txt";
const IMAGE_DIR: &str = "CUB_200_2011/CUB_200_2011/images";
const SPLIT_FILE: &str = "CUB_200_2011/CUB_200_2011/train_test_split.txt";
const IMAGES_LIST_FILE: &str = "CUB_200_2011/CUB_200_2011/images.txt";

#[derive(Debug)]
pub struct Cub200_2011 {
    root: PathBuf,
    split: Split,
    categories: CategoryIndex,
    samples: Vec<Sample>,
}

pub fn build(options: &DatasetOptions) -> Result<Box<dyn FgvcDataset>> {
    Ok(Box::new(Cub200_2011::new(&options.root, options.split, options.download)?))
}

impl Cub200_2011 {
    /// Loads everything eagerly: optional download and extraction, then the
    /// category index, then the sample list for `split`.
    pub fn new<P: AsRef<Path>>(root: P, split: Split, download: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if download {
            Self::download(&root, false)?;
        }
        let categories = load_categories(&root.join(IMAGE_DIR))?;
        let samples = load_samples(&root, split, &categories)?;
        tracing::info!(split = %split, samples = samples.len(), categories = categories.len(), "loaded {}", NAME);
        Ok(Self {
            root,
            split,
            categories,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn split(&self) -> Split {
        self.split
    }

    /// Fetches and unpacks the archive under `root` unless the extracted
    /// directory is already there.
    pub fn download(root: &Path, overwrite: bool) -> Result<()> {
        if root.join(EXTRACTED_DIR).exists() && !overwrite {
            tracing::info!("{} already exists under {:?}", NAME, root);
            return Ok(());
        }
        fs::create_dir_all(root)?;
        let archive = root.join(ARCHIVE);
        if !archive.exists() {
            download::fetch(DOWNLOAD_LINK, &archive)?;
        }
        extract::extract(&archive)?;
        tracing::info!("{} dataset is ready", NAME);
        Ok(())
    }
}

impl FgvcDataset for Cub200_2011 {
    fn name(&self) -> &str {
        NAME
    }

    fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn categories(&self) -> &CategoryIndex {
        &self.categories
    }
}

/// Reads `<index>.<name>` class directories; indices are 1-based on disk.
fn load_categories(image_dir: &Path) -> Result<CategoryIndex> {
    let mut categories = CategoryIndex::new();
    let mut entries = fs::read_dir(image_dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.retain(|e| e.path().is_dir());
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let (index, name) = parse_class_dir(&dir_name)?;
        categories.insert(name, index)?;
    }
    Ok(categories)
}

fn parse_class_dir(dir_name: &str) -> Result<(i64, &str)> {
    let malformed = || FgvcError::Config(format!("class directory '{}' is not named <index>.<name>", dir_name));
    let (index, name) = dir_name.split_once('.').ok_or_else(malformed)?;
    let index: i64 = index.parse().map_err(|_| malformed())?;
    if index < 1 || name.is_empty() {
        return Err(malformed());
    }
    Ok((index - 1, name))
}

fn load_samples(root: &Path, split: Split, categories: &CategoryIndex) -> Result<Vec<Sample>> {
    let wanted = match split {
        Split::Train => "1",
        Split::Test => "0",
    };

    let split_file = root.join(SPLIT_FILE);
    let mut image_ids = HashSet::new();
    for (id, is_train) in read_pairs(&split_file)? {
        if is_train == wanted {
            image_ids.insert(id);
        }
    }

    let image_dir = root.join(IMAGE_DIR);
    let mut samples = Vec::with_capacity(image_ids.len());
    for (id, relative) in read_pairs(&root.join(IMAGES_LIST_FILE))? {
        if !image_ids.contains(&id) {
            continue;
        }
        let class_dir = relative.split('/').next().unwrap_or_default();
        let (_, category) = parse_class_dir(class_dir)?;
        let label = categories.encode(category).ok_or_else(|| {
            FgvcError::Config(format!("image {} refers to unknown category '{}'", relative, category))
        })?;
        samples.push(Sample {
            path: image_dir.join(&relative),
            label,
        });
    }
    Ok(samples)
}

/// Parses a two-column whitespace-separated manifest.
fn read_pairs(path: &Path) -> Result<Vec<(String, String)>> {
    let content = fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(a), Some(b), None) => pairs.push((a.to_string(), b.to_string())),
            _ => {
                return Err(FgvcError::Config(format!(
                    "{}:{}: expected two columns, got '{}'",
                    path.display(),
                    line_no + 1,
                    line
                )))
            }
        }
    }
    Ok(pairs)
}

/// `classes.txt` lists `<id> <index>.<name>`; kept for tools that want the
/// canonical ordering without scanning the image tree.
pub fn read_class_list(root: &Path) -> Result<Vec<(i64, String)>> {
    read_pairs(&root.join(CLASSES_FILE))?
        .into_iter()
        .map(|(_, dir)| parse_class_dir(&dir).map(|(i, n)| (i, n.to_string())))
        .collect()
}
