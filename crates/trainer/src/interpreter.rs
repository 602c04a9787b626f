//! Per-pixel attributions for a trained model.

use tch::nn::ModuleT;
use tch::{Kind, Tensor};

use fgvc_core::{Args, FgvcModel, Registry, Result};

#[derive(Debug)]
pub struct Interpretation {
    /// `[B, H, W]` in `[0, 1]`.
    pub saliency: Tensor,
    /// `[B]` predicted class indices.
    pub predictions: Tensor,
}

pub trait Interpreter: std::fmt::Debug {
    fn interpret(&self, model: &FgvcModel, images: &Tensor) -> Result<Interpretation>;
}

pub type InterpreterBuilder = fn(&Args) -> Result<Box<dyn Interpreter>>;

pub fn register_defaults(registry: &mut Registry<InterpreterBuilder>) -> Result<()> {
    registry.register("saliency_map", saliency_map)?;
    Ok(())
}

/// Vanilla gradient saliency: |d score_top / d input|, max over channels.
#[derive(Debug)]
pub struct SaliencyMap;

impl Interpreter for SaliencyMap {
    fn interpret(&self, model: &FgvcModel, images: &Tensor) -> Result<Interpretation> {
        let input = images.to_device(model.device()).detach().set_requires_grad(true);
        let logits = model.forward_t(&input, false);
        let (scores, predictions) = logits.max_dim(1, false);
        scores.sum(Kind::Float).backward();

        let grad = input.grad().abs().amax(&[1i64][..], false);
        let low = grad.amin(&[1i64, 2][..], true);
        let high = grad.amax(&[1i64, 2][..], true);
        let saliency = (&grad - &low) / (high - &low + 1e-12);

        // The backward pass also filled parameter gradients.
        for (_, _, mut var) in model.named_parameters() {
            var.zero_grad();
        }
        Ok(Interpretation {
            saliency: saliency.detach(),
            predictions,
        })
    }
}

pub fn saliency_map(_args: &Args) -> Result<Box<dyn Interpreter>> {
    Ok(Box::new(SaliencyMap))
}
