//! Single optimization steps.

use std::collections::BTreeMap;
use tch::{Device, Tensor};

use datasets::Batch;
use fgvc_core::criterions::{compute_loss_value, detach_loss_value};
use fgvc_core::{FgvcModel, Registry, Result};

use crate::optim::GroupedOptimizer;

/// Key of the aggregated loss in an update result.
pub const ITER_LOSS: &str = "iter_loss";

const VIT_CLIP_NORM: f64 = 1.0;

/// Dynamic loss scaling. The loss is multiplied by `scale` before the
/// backward pass; gradients are divided back before clipping. A step with
/// non-finite gradients is skipped and the scale halves; after
/// `growth_interval` clean steps it doubles.
#[derive(Debug, Clone)]
pub struct LossScaler {
    scale: f64,
    growth_interval: usize,
    clean_steps: usize,
}

impl Default for LossScaler {
    fn default() -> Self {
        Self {
            scale: 65536.0,
            growth_interval: 2000,
            clean_steps: 0,
        }
    }
}

impl LossScaler {
    /// Starts from `scale` instead of 65536.
    pub fn with_scale(scale: f64) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Unscales gradients in place and reports whether they are all finite.
    fn unscale(&self, model: &FgvcModel) -> bool {
        let inv = 1.0 / self.scale;
        let mut finite = true;
        tch::no_grad(|| {
            for (_, _, var) in model.named_parameters() {
                let mut grad = var.grad();
                if !grad.defined() {
                    continue;
                }
                let _ = grad.g_mul_scalar_(inv);
                if grad.isfinite().all().int64_value(&[]) == 0 {
                    finite = false;
                }
            }
        });
        finite
    }

    fn update(&mut self, finite: bool) {
        if finite {
            self.clean_steps += 1;
            if self.clean_steps >= self.growth_interval {
                self.scale *= 2.0;
                self.clean_steps = 0;
            }
        } else {
            self.scale = (self.scale * 0.5).max(1.0);
            self.clean_steps = 0;
            log::warn!("non-finite gradients, loss scale lowered to {}", self.scale);
        }
    }
}

/// Per-run settings shared by every update call.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Max gradient norm for `general_update`.
    pub clip_grad: Option<f64>,
    pub scaler: Option<LossScaler>,
}

pub type UpdateFunction = fn(&FgvcModel, &Batch, &mut GroupedOptimizer, &mut StepOptions) -> Result<BTreeMap<String, f64>>;

pub fn register_defaults(registry: &mut Registry<UpdateFunction>) -> Result<()> {
    registry.register("general_update", general_update)?;
    registry.register("vit_update_strategy", vit_update_strategy)?;
    Ok(())
}

fn step(
    model: &FgvcModel,
    batch: &Batch,
    optimizer: &mut GroupedOptimizer,
    scaler: Option<&mut LossScaler>,
    clip: Option<f64>,
) -> Result<BTreeMap<String, f64>> {
    let device: Device = model.device();
    let images = batch.images.to_device(device);
    let labels = batch.labels.to_device(device);

    optimizer.zero_grad();
    let (_, losses) = model.forward_with_losses(&images, &labels, true);
    let total: Tensor = compute_loss_value(&losses);

    let mut apply = true;
    match scaler {
        Some(scaler) => {
            (&total * scaler.scale()).backward();
            let finite = scaler.unscale(model);
            scaler.update(finite);
            apply = finite;
        }
        None => total.backward(),
    }

    if apply {
        if let Some(max) = clip {
            optimizer.clip_grad_norm(max);
        }
        optimizer.step();
    }
    optimizer.zero_grad();

    let mut values = detach_loss_value(&losses);
    values.insert(ITER_LOSS.to_string(), total.double_value(&[]));
    Ok(values)
}

/// Forward, weighted loss, backward, optional clipping, step.
pub fn general_update(
    model: &FgvcModel,
    batch: &Batch,
    optimizer: &mut GroupedOptimizer,
    options: &mut StepOptions,
) -> Result<BTreeMap<String, f64>> {
    let clip = options.clip_grad;
    step(model, batch, optimizer, options.scaler.as_mut(), clip)
}

/// Same step with the gradient norm always clipped to 1.
pub fn vit_update_strategy(
    model: &FgvcModel,
    batch: &Batch,
    optimizer: &mut GroupedOptimizer,
    options: &mut StepOptions,
) -> Result<BTreeMap<String, f64>> {
    step(model, batch, optimizer, options.scaler.as_mut(), Some(VIT_CLIP_NORM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaler_backs_off_and_grows() {
        let mut scaler = LossScaler {
            scale: 8.0,
            growth_interval: 2,
            clean_steps: 0,
        };
        scaler.update(false);
        assert_eq!(scaler.scale(), 4.0);
        scaler.update(true);
        scaler.update(true);
        assert_eq!(scaler.scale(), 8.0);
    }
}
