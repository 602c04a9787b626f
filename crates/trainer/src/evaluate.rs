use std::collections::BTreeMap;
use tch::nn::ModuleT;

use datasets::DataLoader;
use fgvc_core::{FgvcModel, Registry, Result};

use crate::metrics::Metric;

pub type EvaluateFunction = fn(&FgvcModel, &mut DataLoader, &mut [Box<dyn Metric>]) -> Result<BTreeMap<String, f64>>;

pub fn register_defaults(registry: &mut Registry<EvaluateFunction>) -> Result<()> {
    registry.register("general_evaluate", general_evaluate)?;
    Ok(())
}

/// Runs the whole loader in eval mode without gradients and returns each
/// metric's value under its configured name.
pub fn general_evaluate(
    model: &FgvcModel,
    loader: &mut DataLoader,
    metrics: &mut [Box<dyn Metric>],
) -> Result<BTreeMap<String, f64>> {
    for metric in metrics.iter_mut() {
        metric.reset();
    }
    let device = model.device();
    for batch in loader.iter() {
        let batch = batch?.to_device(device);
        let logits = tch::no_grad(|| model.forward_t(&batch.images, false));
        for metric in metrics.iter_mut() {
            metric.update(&logits, &batch.labels)?;
        }
    }
    Ok(metrics.iter().map(|m| (m.name().to_string(), m.compute())).collect())
}
