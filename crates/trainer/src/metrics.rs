//! Streaming classification metrics.

use std::collections::BTreeMap;
use tch::{Kind, Tensor};

use fgvc_core::config::MetricConfig;
use fgvc_core::{FgvcError, Registry, Result};

pub trait Metric: std::fmt::Debug {
    /// Display name from the config item.
    fn name(&self) -> &str;

    /// Accumulates one batch of `[B, C]` logits against `[B]` targets.
    fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()>;

    fn compute(&self) -> f64;

    fn reset(&mut self);
}

pub type MetricBuilder = fn(&MetricConfig) -> Result<Box<dyn Metric>>;

pub fn register_defaults(registry: &mut Registry<MetricBuilder>) -> Result<()> {
    registry.register("accuracy", accuracy)?;
    registry.register("precision", precision)?;
    registry.register("recall", recall)?;
    Ok(())
}

#[derive(Debug)]
pub struct Accuracy {
    name: String,
    top_k: i64,
    correct: i64,
    total: i64,
}

impl Metric for Accuracy {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()> {
        let (_, classes) = logits.size2()?;
        let k = self.top_k.min(classes);
        let (_, top) = logits.f_topk(k, -1, true, true)?;
        let hits = top.eq_tensor(&targets.unsqueeze(-1)).any_dim(-1, false);
        self.correct += hits.sum(Kind::Int64).int64_value(&[]);
        self.total += targets.size()[0];
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

pub fn accuracy(cfg: &MetricConfig) -> Result<Box<dyn Metric>> {
    Ok(Box::new(Accuracy {
        name: cfg.name.clone(),
        top_k: cfg.top_k.unwrap_or(1),
        correct: 0,
        total: 0,
    }))
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    tp: u64,
    fp: u64,
    fn_: u64,
}

/// Per-class confusion counts. A prediction whose softmax confidence is
/// below `threshold` is an abstention: it misses its target but claims
/// nothing.
#[derive(Debug)]
struct ClassCounts {
    threshold: f64,
    classes: BTreeMap<i64, Counts>,
}

impl ClassCounts {
    fn new(threshold: f64) -> Self {
        Self {
            threshold,
            classes: BTreeMap::new(),
        }
    }

    fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()> {
        let (confidence, predicted) = logits.softmax(-1, Kind::Float).max_dim(-1, false);
        let confidence = Vec::<f64>::try_from(&confidence.to_kind(Kind::Double).to_device(tch::Device::Cpu))?;
        let predicted = Vec::<i64>::try_from(&predicted.to_device(tch::Device::Cpu))?;
        let targets = Vec::<i64>::try_from(&targets.to_kind(Kind::Int64).to_device(tch::Device::Cpu))?;
        if predicted.len() != targets.len() {
            return Err(FgvcError::Config(format!(
                "{} predictions for {} targets",
                predicted.len(),
                targets.len()
            )));
        }

        for ((&p, &t), &conf) in predicted.iter().zip(&targets).zip(&confidence) {
            if conf < self.threshold {
                self.classes.entry(t).or_default().fn_ += 1;
            } else if p == t {
                self.classes.entry(t).or_default().tp += 1;
            } else {
                self.classes.entry(p).or_default().fp += 1;
                self.classes.entry(t).or_default().fn_ += 1;
            }
        }
        Ok(())
    }

    /// Mean of `tp / (tp + other)` over classes where the denominator is
    /// non-zero.
    fn macro_mean(&self, other: impl Fn(&Counts) -> u64) -> f64 {
        let ratios: Vec<f64> = self
            .classes
            .values()
            .filter_map(|c| {
                let denom = c.tp + other(c);
                (denom > 0).then(|| c.tp as f64 / denom as f64)
            })
            .collect();
        if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        }
    }
}

#[derive(Debug)]
pub struct Precision {
    name: String,
    counts: ClassCounts,
}

impl Metric for Precision {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()> {
        self.counts.update(logits, targets)
    }

    fn compute(&self) -> f64 {
        self.counts.macro_mean(|c| c.fp)
    }

    fn reset(&mut self) {
        self.counts.classes.clear();
    }
}

pub fn precision(cfg: &MetricConfig) -> Result<Box<dyn Metric>> {
    Ok(Box::new(Precision {
        name: cfg.name.clone(),
        counts: ClassCounts::new(cfg.threshold.unwrap_or(0.0)),
    }))
}

#[derive(Debug)]
pub struct Recall {
    name: String,
    counts: ClassCounts,
}

impl Metric for Recall {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, logits: &Tensor, targets: &Tensor) -> Result<()> {
        self.counts.update(logits, targets)
    }

    fn compute(&self) -> f64 {
        self.counts.macro_mean(|c| c.fn_)
    }

    fn reset(&mut self) {
        self.counts.classes.clear();
    }
}

pub fn recall(cfg: &MetricConfig) -> Result<Box<dyn Metric>> {
    Ok(Box::new(Recall {
        name: cfg.name.clone(),
        counts: ClassCounts::new(cfg.threshold.unwrap_or(0.0)),
    }))
}
