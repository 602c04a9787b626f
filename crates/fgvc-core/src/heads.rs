//! Classification heads. Heads take `[batch, dim]` embeddings; when no
//! encoder is configured they receive the raw feature map and average it
//! spatially first.

use tch::{nn, Kind, Tensor};

use crate::args::Args;
use crate::error::{FgvcError, Result};
use crate::registry::Registry;

pub trait Head: nn::ModuleT {}

/// `(path, input dim, class count, args)`.
pub type HeadBuilder = fn(&nn::Path, i64, i64, &Args) -> Result<Box<dyn Head>>;

pub fn register_defaults(registry: &mut Registry<HeadBuilder>) -> Result<()> {
    registry.register("classifier_1fc", classifier_1fc)?;
    registry.register("classifier_2fc", classifier_2fc)?;
    Ok(())
}

fn flatten_input(xs: &Tensor) -> Tensor {
    if xs.dim() == 4 {
        xs.mean_dim(Some(&[-2, -1][..]), false, Kind::Float)
    } else {
        xs.shallow_clone()
    }
}

#[derive(Debug)]
pub struct Classifier1Fc {
    fc: nn::Linear,
}

impl nn::ModuleT for Classifier1Fc {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        flatten_input(xs).apply(&self.fc)
    }
}

impl Head for Classifier1Fc {}

#[derive(Debug)]
pub struct Classifier2Fc {
    fc1: nn::Linear,
    bn: nn::BatchNorm,
    fc2: nn::Linear,
    dropout: f64,
}

impl nn::ModuleT for Classifier2Fc {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        flatten_input(xs)
            .apply(&self.fc1)
            .apply_t(&self.bn, train)
            .relu()
            .dropout(self.dropout, train)
            .apply(&self.fc2)
    }
}

impl Head for Classifier2Fc {}

pub fn classifier_1fc(p: &nn::Path, in_dim: i64, class_num: i64, _args: &Args) -> Result<Box<dyn Head>> {
    Ok(Box::new(Classifier1Fc {
        fc: nn::linear(p / "fc", in_dim, class_num, Default::default()),
    }))
}

pub fn classifier_2fc(p: &nn::Path, in_dim: i64, class_num: i64, args: &Args) -> Result<Box<dyn Head>> {
    let hidden_dim = args.i64("classifier_2fc", "hidden_dim")?.unwrap_or(512);
    let dropout = args.f64("classifier_2fc", "dropout")?.unwrap_or(0.0);
    if !(0.0..1.0).contains(&dropout) {
        return Err(FgvcError::InvalidArg {
            component: "classifier_2fc".to_string(),
            key: "dropout".to_string(),
            reason: format!("must be in [0, 1), got {}", dropout),
        });
    }
    Ok(Box::new(Classifier2Fc {
        fc1: nn::linear(p / "fc1", in_dim, hidden_dim, Default::default()),
        bn: nn::batch_norm1d(p / "bn", hidden_dim, Default::default()),
        fc2: nn::linear(p / "fc2", hidden_dim, class_num, Default::default()),
        dropout,
    }))
}
