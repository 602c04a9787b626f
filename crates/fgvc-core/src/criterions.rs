//! Loss terms and the weighted sum that forms the training loss.

use std::collections::BTreeMap;
use tch::{Kind, Reduction, Tensor};

use crate::args::Args;
use crate::error::{FgvcError, Result};
use crate::registry::Registry;

pub trait Criterion: std::fmt::Debug + Send {
    /// Scalar loss for `logits: [batch, classes]` against `targets: [batch]`.
    fn compute(&self, logits: &Tensor, targets: &Tensor) -> Tensor;
}

pub type CriterionBuilder = fn(&Args) -> Result<Box<dyn Criterion>>;

pub fn register_defaults(registry: &mut Registry<CriterionBuilder>) -> Result<()> {
    registry.register("cross_entropy_loss", cross_entropy_loss)?;
    registry.register("label_smoothing_loss", label_smoothing_loss)?;
    Ok(())
}

#[derive(Debug)]
pub struct CrossEntropyLoss;

impl Criterion for CrossEntropyLoss {
    fn compute(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        logits.cross_entropy_for_logits(targets)
    }
}

#[derive(Debug)]
pub struct LabelSmoothingLoss {
    smoothing: f64,
}

impl Criterion for LabelSmoothingLoss {
    fn compute(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        logits.cross_entropy_loss::<Tensor>(targets, None, Reduction::Mean, -100, self.smoothing)
    }
}

pub fn cross_entropy_loss(_args: &Args) -> Result<Box<dyn Criterion>> {
    Ok(Box::new(CrossEntropyLoss))
}

pub fn label_smoothing_loss(args: &Args) -> Result<Box<dyn Criterion>> {
    let smoothing = args.f64("label_smoothing_loss", "smoothing")?.unwrap_or(0.1);
    if !(0.0..1.0).contains(&smoothing) {
        return Err(FgvcError::InvalidArg {
            component: "label_smoothing_loss".to_string(),
            key: "smoothing".to_string(),
            reason: format!("must be in [0, 1), got {}", smoothing),
        });
    }
    Ok(Box::new(LabelSmoothingLoss { smoothing }))
}

#[derive(Debug)]
pub struct WeightedCriterion {
    pub criterion: Box<dyn Criterion>,
    pub weight: f64,
}

/// Named loss terms in configuration order.
#[derive(Debug, Default)]
pub struct Criterions {
    items: Vec<(String, WeightedCriterion)>,
}

impl Criterions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, criterion: Box<dyn Criterion>, weight: f64) -> Result<()> {
        let name = name.into();
        if self.items.iter().any(|(n, _)| *n == name) {
            return Err(FgvcError::Config(format!("criterion '{}' is defined twice", name)));
        }
        self.items.push((name, WeightedCriterion { criterion, weight }));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WeightedCriterion> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn compute(&self, logits: &Tensor, targets: &Tensor) -> Vec<LossItem> {
        self.items
            .iter()
            .map(|(name, c)| LossItem {
                name: name.clone(),
                value: c.criterion.compute(logits, targets),
                weight: c.weight,
            })
            .collect()
    }
}

/// One evaluated loss term.
#[derive(Debug)]
pub struct LossItem {
    pub name: String,
    pub value: Tensor,
    pub weight: f64,
}

/// `Σ wᵢ · lossᵢ`, still attached to the graph.
pub fn compute_loss_value(losses: &[LossItem]) -> Tensor {
    let mut total: Option<Tensor> = None;
    for item in losses {
        let term = item.value.mean(Kind::Float) * item.weight;
        total = Some(match total {
            Some(acc) => acc + term,
            None => term,
        });
    }
    total.unwrap_or_else(|| Tensor::from(0.0f32))
}

/// Per-term scalar values for logging.
pub fn detach_loss_value(losses: &[LossItem]) -> BTreeMap<String, f64> {
    losses
        .iter()
        .map(|item| (item.name.clone(), item.value.mean(Kind::Float).double_value(&[])))
        .collect()
}
