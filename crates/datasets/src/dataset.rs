use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use fgvc_core::{FgvcError, Registry, Result};

/// One labelled image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl FromStr for Split {
    type Err = FgvcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            other => Err(FgvcError::Config(format!(
                "dataset mode must be 'train' or 'test', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional category name ↔ index mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryIndex {
    category2index: BTreeMap<String, i64>,
    index2category: BTreeMap<i64, String>,
}

impl CategoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, index: i64) -> Result<()> {
        let name = name.into();
        if self.category2index.contains_key(&name) || self.index2category.contains_key(&index) {
            return Err(FgvcError::Config(format!(
                "category '{}' or index {} is defined twice",
                name, index
            )));
        }
        self.category2index.insert(name.clone(), index);
        self.index2category.insert(index, name);
        Ok(())
    }

    pub fn encode(&self, category: &str) -> Option<i64> {
        self.category2index.get(category).copied()
    }

    pub fn decode(&self, index: i64) -> Option<&str> {
        self.index2category.get(&index).map(String::as_str)
    }

    /// Category names ordered by index.
    pub fn names(&self) -> Vec<&str> {
        self.index2category.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.category2index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.category2index.is_empty()
    }
}

pub trait FgvcDataset: Send + Sync {
    fn name(&self) -> &str;

    fn samples(&self) -> &[Sample];

    fn categories(&self) -> &CategoryIndex;

    fn len(&self) -> usize {
        self.samples().len()
    }

    fn is_empty(&self) -> bool {
        self.samples().is_empty()
    }

    fn get(&self, index: usize) -> Option<&Sample> {
        self.samples().get(index)
    }

    fn labels(&self) -> Vec<i64> {
        self.samples().iter().map(|s| s.label).collect()
    }

    fn encode_category(&self, category: &str) -> Option<i64> {
        self.categories().encode(category)
    }

    fn decode_category(&self, index: i64) -> Option<&str> {
        self.categories().decode(index)
    }
}

/// Construction parameters shared by every dataset implementation.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub root: PathBuf,
    pub split: Split,
    pub download: bool,
}

pub type DatasetBuilder = fn(&DatasetOptions) -> Result<Box<dyn FgvcDataset>>;

pub fn register_defaults(registry: &mut Registry<DatasetBuilder>) -> Result<()> {
    registry.register("CUB_200_2011", crate::cub::build)?;
    registry.register("image_folder", crate::image_folder::build)?;
    Ok(())
}
