//! Index and batch samplers used by the dataloader.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

use fgvc_core::{Args, FgvcError, Registry, Result};

/// Yields the sample order for one epoch.
pub trait IndexSampler: std::fmt::Debug + Send + Sync {
    fn indices(&mut self, len: usize) -> Vec<usize>;
}

/// Yields whole batches for one epoch; replaces `BATCH_SIZE`.
pub trait BatchSampler: std::fmt::Debug + Send + Sync {
    fn batches(&mut self, labels: &[i64]) -> Vec<Vec<usize>>;

    fn num_batches(&self, labels: &[i64]) -> usize;
}

#[derive(Debug)]
pub enum Sampler {
    Index(Box<dyn IndexSampler>),
    Batch(Box<dyn BatchSampler>),
}

impl Sampler {
    pub fn is_batch_sampler(&self) -> bool {
        matches!(self, Sampler::Batch(_))
    }
}

pub type SamplerBuilder = fn(&Args) -> Result<Sampler>;

pub fn register_defaults(registry: &mut Registry<SamplerBuilder>) -> Result<()> {
    registry.register("sequential_sampler", sequential_sampler)?;
    registry.register("random_sampler", random_sampler)?;
    registry.register("class_balanced_batch_sampler", class_balanced_batch_sampler)?;
    Ok(())
}

fn rng_from(args: &Args, component: &str) -> Result<StdRng> {
    Ok(match args.i64(component, "seed")? {
        Some(seed) => StdRng::seed_from_u64(seed as u64),
        None => StdRng::from_entropy(),
    })
}

#[derive(Debug)]
pub struct SequentialSampler;

impl IndexSampler for SequentialSampler {
    fn indices(&mut self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

pub fn sequential_sampler(_args: &Args) -> Result<Sampler> {
    Ok(Sampler::Index(Box::new(SequentialSampler)))
}

#[derive(Debug)]
pub struct RandomSampler {
    rng: StdRng,
}

impl IndexSampler for RandomSampler {
    fn indices(&mut self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut self.rng);
        order
    }
}

pub fn random_sampler(args: &Args) -> Result<Sampler> {
    Ok(Sampler::Index(Box::new(RandomSampler {
        rng: rng_from(args, "random_sampler")?,
    })))
}

/// `classes_per_batch` random classes × `samples_per_class` samples each.
/// Classes with fewer samples are drawn with replacement.
#[derive(Debug)]
pub struct ClassBalancedBatchSampler {
    classes_per_batch: usize,
    samples_per_class: usize,
    rng: StdRng,
}

impl BatchSampler for ClassBalancedBatchSampler {
    fn batches(&mut self, labels: &[i64]) -> Vec<Vec<usize>> {
        let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(i);
        }
        let mut classes: Vec<i64> = by_class.keys().copied().collect();
        classes.shuffle(&mut self.rng);

        let mut batches = Vec::new();
        for group in classes.chunks_exact(self.classes_per_batch) {
            let mut batch = Vec::with_capacity(self.classes_per_batch * self.samples_per_class);
            for class in group {
                let pool = &by_class[class];
                if pool.len() >= self.samples_per_class {
                    batch.extend(pool.choose_multiple(&mut self.rng, self.samples_per_class).copied());
                } else {
                    for _ in 0..self.samples_per_class {
                        if let Some(&i) = pool.choose(&mut self.rng) {
                            batch.push(i);
                        }
                    }
                }
            }
            batches.push(batch);
        }
        batches
    }

    fn num_batches(&self, labels: &[i64]) -> usize {
        let mut classes: Vec<i64> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        classes.len() / self.classes_per_batch
    }
}

pub fn class_balanced_batch_sampler(args: &Args) -> Result<Sampler> {
    let component = "class_balanced_batch_sampler";
    let classes_per_batch = args.require_i64(component, "classes_per_batch")?;
    let samples_per_class = args.require_i64(component, "samples_per_class")?;
    for (key, value) in [("classes_per_batch", classes_per_batch), ("samples_per_class", samples_per_class)] {
        if value < 1 {
            return Err(FgvcError::InvalidArg {
                component: component.to_string(),
                key: key.to_string(),
                reason: format!("must be at least 1, got {}", value),
            });
        }
    }
    Ok(Sampler::Batch(Box::new(ClassBalancedBatchSampler {
        classes_per_batch: classes_per_batch as usize,
        samples_per_class: samples_per_class as usize,
        rng: rng_from(args, component)?,
    })))
}
