use memmap2::MmapOptions;
use safetensors::SafeTensors;
use std::fs::File;
use std::path::Path;
use tch::{nn, Kind, Tensor};

use crate::error::{FgvcError, Result};

/// Copies tensors from a safetensors file into `vs`, prepending `prefix` to
/// every stored name (`conv1.weight` → `backbone.conv1.weight`).
///
/// Returns the number of tensors copied. Tensors without a counterpart are
/// skipped with a warning; a shape mismatch is an error.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P, prefix: &str) -> Result<usize> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut copied = 0;

    for (name, view) in tensors.tensors() {
        let target = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let Some(var) = variables.get_mut(&target) else {
            log::warn!("tensor {} in {:?} has no counterpart in the model", name, path);
            continue;
        };

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if var.size() != shape {
            return Err(FgvcError::Config(format!(
                "shape mismatch for {}: checkpoint {:?}, model {:?}",
                target,
                shape,
                var.size()
            )));
        }
        let kind = match view.dtype() {
            safetensors::Dtype::F32 => Kind::Float,
            safetensors::Dtype::F16 => Kind::Half,
            safetensors::Dtype::BF16 => Kind::BFloat16,
            safetensors::Dtype::I64 => Kind::Int64,
            other => return Err(FgvcError::Config(format!("unsupported dtype {:?} for {}", other, name))),
        };

        let tensor = Tensor::from_data_size(view.data(), &shape, kind).to_device(device);
        tch::no_grad(|| {
            var.copy_(&tensor);
        });
        copied += 1;
    }

    log::info!("loaded {} pretrained tensors from {:?}", copied, path);
    Ok(copied)
}
