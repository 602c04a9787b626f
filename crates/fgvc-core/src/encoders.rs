//! Encoders turn a `[batch, channels, h, w]` feature map into a
//! `[batch, dim]` embedding.

use tch::{nn, Kind, Tensor};

use crate::args::Args;
use crate::error::Result;
use crate::registry::Registry;

pub trait Encoder: nn::ModuleT {
    fn out_dim(&self) -> i64;
}

/// `(path, input channels, args)`.
pub type EncoderBuilder = fn(&nn::Path, i64, &Args) -> Result<Box<dyn Encoder>>;

pub fn register_defaults(registry: &mut Registry<EncoderBuilder>) -> Result<()> {
    registry.register("global_avg_pooling", global_avg_pooling)?;
    registry.register("global_max_pooling", global_max_pooling)?;
    Ok(())
}

#[derive(Debug)]
pub struct GlobalAvgPooling {
    channels: i64,
}

impl nn::ModuleT for GlobalAvgPooling {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        xs.mean_dim(Some(&[-2, -1][..]), false, Kind::Float)
    }
}

impl Encoder for GlobalAvgPooling {
    fn out_dim(&self) -> i64 {
        self.channels
    }
}

#[derive(Debug)]
pub struct GlobalMaxPooling {
    channels: i64,
}

impl nn::ModuleT for GlobalMaxPooling {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        xs.amax(&[-2, -1], false)
    }
}

impl Encoder for GlobalMaxPooling {
    fn out_dim(&self) -> i64 {
        self.channels
    }
}

pub fn global_avg_pooling(_p: &nn::Path, in_channels: i64, _args: &Args) -> Result<Box<dyn Encoder>> {
    Ok(Box::new(GlobalAvgPooling { channels: in_channels }))
}

pub fn global_max_pooling(_p: &nn::Path, in_channels: i64, _args: &Args) -> Result<Box<dyn Encoder>> {
    Ok(Box::new(GlobalMaxPooling { channels: in_channels }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::ModuleT, Device};

    #[test]
    fn pooling_flattens_spatial_dims() {
        let vs = nn::VarStore::new(Device::Cpu);
        let xs = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 6.0]).view([1, 1, 2, 2]);

        let avg = global_avg_pooling(&vs.root(), 1, &Args::default()).unwrap();
        let max = global_max_pooling(&vs.root(), 1, &Args::default()).unwrap();

        assert_eq!(avg.forward_t(&xs, false).size(), vec![1, 1]);
        assert_eq!(avg.forward_t(&xs, false).double_value(&[0, 0]), 3.0);
        assert_eq!(max.forward_t(&xs, false).double_value(&[0, 0]), 6.0);
        assert_eq!(max.out_dim(), 1);
    }
}
