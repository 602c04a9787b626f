//! Convolutional feature extractors.
//!
//! Variable names follow torchvision's ResNet layout (`conv1`, `bn1`,
//! `layer1.0.conv1`, `layer1.0.downsample.0`, ...) so converted ImageNet
//! weights load by name.

use tch::{nn, nn::ModuleT, Tensor};

use crate::args::Args;
use crate::error::Result;
use crate::registry::Registry;

pub trait Backbone: nn::ModuleT {
    /// Channels of the feature map produced by `forward_t`.
    fn out_channels(&self) -> i64;
}

pub type BackboneBuilder = fn(&nn::Path, &Args) -> Result<Box<dyn Backbone>>;

pub fn register_defaults(registry: &mut Registry<BackboneBuilder>) -> Result<()> {
    registry.register("resnet18", resnet18)?;
    registry.register("resnet34", resnet34)?;
    registry.register("resnet50", resnet50)?;
    Ok(())
}

fn conv(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> nn::Conv2D {
    let config = nn::ConvConfig {
        stride,
        padding,
        bias: false,
        ..Default::default()
    };
    nn::conv2d(p, c_in, c_out, ksize, config)
}

fn downsample(p: &nn::Path, c_in: i64, c_out: i64, stride: i64) -> Option<(nn::Conv2D, nn::BatchNorm)> {
    if stride != 1 || c_in != c_out {
        Some((
            conv(p / "downsample" / 0, c_in, c_out, 1, stride, 0),
            nn::batch_norm2d(p / "downsample" / 1, c_out, Default::default()),
        ))
    } else {
        None
    }
}

fn shortcut(xs: &Tensor, downsample: &Option<(nn::Conv2D, nn::BatchNorm)>, train: bool) -> Tensor {
    match downsample {
        Some((conv, bn)) => xs.apply(conv).apply_t(bn, train),
        None => xs.shallow_clone(),
    }
}

#[derive(Debug)]
struct BasicBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl BasicBlock {
    const EXPANSION: i64 = 1;

    fn new(p: &nn::Path, c_in: i64, planes: i64, stride: i64) -> Self {
        Self {
            conv1: conv(p / "conv1", c_in, planes, 3, stride, 1),
            bn1: nn::batch_norm2d(p / "bn1", planes, Default::default()),
            conv2: conv(p / "conv2", planes, planes, 3, 1, 1),
            bn2: nn::batch_norm2d(p / "bn2", planes, Default::default()),
            downsample: downsample(p, c_in, planes * Self::EXPANSION, stride),
        }
    }
}

impl nn::ModuleT for BasicBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        (ys + shortcut(xs, &self.downsample, train)).relu()
    }
}

#[derive(Debug)]
struct Bottleneck {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    conv3: nn::Conv2D,
    bn3: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl Bottleneck {
    const EXPANSION: i64 = 4;

    fn new(p: &nn::Path, c_in: i64, planes: i64, stride: i64) -> Self {
        let c_out = planes * Self::EXPANSION;
        Self {
            conv1: conv(p / "conv1", c_in, planes, 1, 1, 0),
            bn1: nn::batch_norm2d(p / "bn1", planes, Default::default()),
            conv2: conv(p / "conv2", planes, planes, 3, stride, 1),
            bn2: nn::batch_norm2d(p / "bn2", planes, Default::default()),
            conv3: conv(p / "conv3", planes, c_out, 1, 1, 0),
            bn3: nn::batch_norm2d(p / "bn3", c_out, Default::default()),
            downsample: downsample(p, c_in, c_out, stride),
        }
    }
}

impl nn::ModuleT for Bottleneck {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train)
            .relu()
            .apply(&self.conv3)
            .apply_t(&self.bn3, train);
        (ys + shortcut(xs, &self.downsample, train)).relu()
    }
}

#[derive(Debug)]
enum Block {
    Basic(BasicBlock),
    Bottleneck(Bottleneck),
}

impl nn::ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        match self {
            Block::Basic(b) => b.forward_t(xs, train),
            Block::Bottleneck(b) => b.forward_t(xs, train),
        }
    }
}

#[derive(Clone, Copy)]
enum BlockKind {
    Basic,
    Bottleneck,
}

impl BlockKind {
    fn expansion(self) -> i64 {
        match self {
            BlockKind::Basic => BasicBlock::EXPANSION,
            BlockKind::Bottleneck => Bottleneck::EXPANSION,
        }
    }

    fn build(self, p: &nn::Path, c_in: i64, planes: i64, stride: i64) -> Block {
        match self {
            BlockKind::Basic => Block::Basic(BasicBlock::new(p, c_in, planes, stride)),
            BlockKind::Bottleneck => Block::Bottleneck(Bottleneck::new(p, c_in, planes, stride)),
        }
    }
}

/// ResNet trunk without the pooling and fully connected layers: returns
/// `[batch, out_channels, h/32, w/32]`.
#[derive(Debug)]
pub struct ResNet {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    blocks: Vec<Block>,
    out_channels: i64,
}

impl ResNet {
    fn new(p: &nn::Path, kind: BlockKind, depths: [i64; 4]) -> Self {
        let conv1 = conv(p / "conv1", 3, 64, 7, 2, 3);
        let bn1 = nn::batch_norm2d(p / "bn1", 64, Default::default());

        let mut blocks = Vec::new();
        let mut c_in = 64;
        for (stage, (&depth, planes)) in depths.iter().zip([64, 128, 256, 512]).enumerate() {
            let layer = p / format!("layer{}", stage + 1);
            for i in 0..depth {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(kind.build(&(&layer / i), c_in, planes, stride));
                c_in = planes * kind.expansion();
            }
        }

        Self {
            conv1,
            bn1,
            blocks,
            out_channels: c_in,
        }
    }
}

impl nn::ModuleT for ResNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut x = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false);
        for block in &self.blocks {
            x = block.forward_t(&x, train);
        }
        x
    }
}

impl Backbone for ResNet {
    fn out_channels(&self) -> i64 {
        self.out_channels
    }
}

pub fn resnet18(p: &nn::Path, _args: &Args) -> Result<Box<dyn Backbone>> {
    Ok(Box::new(ResNet::new(p, BlockKind::Basic, [2, 2, 2, 2])))
}

pub fn resnet34(p: &nn::Path, _args: &Args) -> Result<Box<dyn Backbone>> {
    Ok(Box::new(ResNet::new(p, BlockKind::Basic, [3, 4, 6, 3])))
}

pub fn resnet50(p: &nn::Path, _args: &Args) -> Result<Box<dyn Backbone>> {
    Ok(Box::new(ResNet::new(p, BlockKind::Bottleneck, [3, 4, 6, 3])))
}
