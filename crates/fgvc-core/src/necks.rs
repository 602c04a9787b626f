//! Feature-map refinement between the backbone and the encoder.

use tch::{nn, Tensor};

use crate::args::Args;
use crate::error::{FgvcError, Result};
use crate::registry::Registry;

pub trait Neck: nn::ModuleT {
    fn out_channels(&self) -> i64;
}

/// `(path, backbone channels, args)`.
pub type NeckBuilder = fn(&nn::Path, i64, &Args) -> Result<Box<dyn Neck>>;

pub fn register_defaults(registry: &mut Registry<NeckBuilder>) -> Result<()> {
    registry.register("conv_projection", conv_projection)?;
    Ok(())
}

/// 1x1 convolution + batch norm + ReLU, changing the channel count.
#[derive(Debug)]
pub struct ConvProjection {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    out_channels: i64,
}

impl nn::ModuleT for ConvProjection {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.conv).apply_t(&self.bn, train).relu()
    }
}

impl Neck for ConvProjection {
    fn out_channels(&self) -> i64 {
        self.out_channels
    }
}

pub fn conv_projection(p: &nn::Path, in_channels: i64, args: &Args) -> Result<Box<dyn Neck>> {
    let out_channels = args.i64("conv_projection", "out_channels")?.unwrap_or(in_channels);
    if out_channels <= 0 {
        return Err(FgvcError::InvalidArg {
            component: "conv_projection".to_string(),
            key: "out_channels".to_string(),
            reason: format!("must be positive, got {}", out_channels),
        });
    }
    let config = nn::ConvConfig {
        bias: false,
        ..Default::default()
    };
    Ok(Box::new(ConvProjection {
        conv: nn::conv2d(p / "conv", in_channels, out_channels, 1, config),
        bn: nn::batch_norm2d(p / "bn", out_channels, Default::default()),
        out_channels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::ModuleT, Device, Kind};

    #[test]
    fn projects_channels() {
        let vs = nn::VarStore::new(Device::Cpu);
        let neck = conv_projection(&vs.root(), 32, &Args::new().with("out_channels", 8)).unwrap();
        assert_eq!(neck.out_channels(), 8);
        let ys = neck.forward_t(&Tensor::randn(&[2, 32, 4, 4], (Kind::Float, Device::Cpu)), false);
        assert_eq!(ys.size(), vec![2, 8, 4, 4]);
    }

    #[test]
    fn defaults_to_input_channels() {
        let vs = nn::VarStore::new(Device::Cpu);
        let neck = conv_projection(&vs.root(), 16, &Args::default()).unwrap();
        assert_eq!(neck.out_channels(), 16);
    }
}
