//! Batched image loading.
//!
//! Each epoch the sampler fixes an order (or whole batches), then every batch
//! is decoded and transformed in parallel on a rayon pool of `num_workers`
//! threads. `num_workers == 0` decodes on the calling thread.

use rayon::prelude::*;
use std::path::PathBuf;
use tch::{Device, Tensor};

use fgvc_core::{FgvcError, Result};

use crate::dataset::FgvcDataset;
use crate::samplers::Sampler;
use crate::transforms::Compose;

#[derive(Debug)]
pub struct Batch {
    /// `[B, C, H, W]`
    pub images: Tensor,
    /// `[B]`, int64
    pub labels: Tensor,
    pub paths: Vec<PathBuf>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn to_device(self, device: Device) -> Self {
        Self {
            images: self.images.to_device(device),
            labels: self.labels.to_device(device),
            paths: self.paths,
        }
    }
}

pub struct DataLoader {
    dataset: Box<dyn FgvcDataset>,
    transforms: Compose,
    sampler: Sampler,
    batch_size: usize,
    pin_memory: bool,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("dataset", &self.dataset.name())
            .field("samples", &self.dataset.len())
            .field("batch_size", &self.batch_size)
            .field("sampler", &self.sampler)
            .finish()
    }
}

impl DataLoader {
    pub fn new(
        dataset: Box<dyn FgvcDataset>,
        transforms: Compose,
        sampler: Sampler,
        batch_size: usize,
        num_workers: usize,
        pin_memory: bool,
    ) -> Result<Self> {
        if batch_size == 0 && !sampler.is_batch_sampler() {
            return Err(FgvcError::Config("batch_size must be greater than 0".to_string()));
        }
        let pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("loader-{}", i))
                .build()
                .map_err(|e| FgvcError::Config(format!("cannot start loader workers: {}", e)))?;
            Some(pool)
        } else {
            None
        };
        // Pinned host memory only makes sense with a CUDA device to copy to.
        let pin_memory = pin_memory && tch::Cuda::is_available();
        Ok(Self {
            dataset,
            transforms,
            sampler,
            batch_size,
            pin_memory,
            pool,
        })
    }

    pub fn dataset(&self) -> &dyn FgvcDataset {
        self.dataset.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch; the last batch may be short.
    pub fn len(&self) -> usize {
        match &self.sampler {
            Sampler::Index(_) => (self.dataset.len() + self.batch_size - 1) / self.batch_size,
            Sampler::Batch(sampler) => sampler.num_batches(&self.dataset.labels()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new epoch.
    pub fn iter(&mut self) -> BatchIter<'_> {
        let plan = match &mut self.sampler {
            Sampler::Index(sampler) => sampler
                .indices(self.dataset.len())
                .chunks(self.batch_size)
                .map(|c| c.to_vec())
                .collect(),
            Sampler::Batch(sampler) => sampler.batches(&self.dataset.labels()),
        };
        BatchIter {
            loader: self,
            plan: plan.into_iter(),
        }
    }

    fn load(&self, index: usize) -> Result<(Tensor, i64, PathBuf)> {
        let sample = self
            .dataset
            .get(index)
            .ok_or_else(|| FgvcError::Config(format!("sample index {} out of range", index)))?;
        let image = image::open(&sample.path).map_err(|e| FgvcError::Image(format!("{}: {}", sample.path.display(), e)))?;
        let tensor = self.transforms.apply(image)?;
        Ok((tensor, sample.label, sample.path.clone()))
    }

    fn collate(&self, indices: &[usize]) -> Result<Batch> {
        let items: Vec<Result<(Tensor, i64, PathBuf)>> = match &self.pool {
            Some(pool) => pool.install(|| indices.par_iter().map(|&i| self.load(i)).collect()),
            None => indices.iter().map(|&i| self.load(i)).collect(),
        };

        let mut images = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            let (image, label, path) = item?;
            images.push(image);
            labels.push(label);
            paths.push(path);
        }

        let mut images = Tensor::f_stack(&images, 0)?;
        if self.pin_memory {
            images = images.pin_memory(Device::Cuda(0));
        }
        Ok(Batch {
            images,
            labels: Tensor::from_slice(&labels),
            paths,
        })
    }
}

pub struct BatchIter<'a> {
    loader: &'a DataLoader,
    plan: std::vec::IntoIter<Vec<usize>>,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.plan.next()?;
        Some(self.loader.collate(&indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.plan.size_hint()
    }
}

impl ExactSizeIterator for BatchIter<'_> {}
