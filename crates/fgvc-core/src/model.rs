use tch::{nn, nn::ModuleT, Device, Tensor};

use crate::backbones::Backbone;
use crate::config::ModelConfig;
use crate::criterions::{Criterions, LossItem};
use crate::encoders::Encoder;
use crate::error::Result;
use crate::heads::Head;
use crate::necks::Neck;
use crate::registry::Registry;
use crate::tag::ComponentTag;

/// Everything `build_model` assembled, handed to the top-level model
/// constructor.
pub struct ModelParts {
    pub cfg: ModelConfig,
    pub vs: nn::VarStore,
    pub backbone: Box<dyn Backbone>,
    pub encoder: Option<Box<dyn Encoder>>,
    pub necks: Option<Box<dyn Neck>>,
    pub heads: Box<dyn Head>,
    pub criterions: Criterions,
}

pub type ModelBuilder = fn(ModelParts) -> Result<FgvcModel>;

pub fn register_defaults(registry: &mut Registry<ModelBuilder>) -> Result<()> {
    registry.register("baseline", baseline)?;
    Ok(())
}

/// backbone → necks → encoder → heads, plus the loss terms used to train it.
pub struct FgvcModel {
    pub cfg: ModelConfig,
    vs: nn::VarStore,
    backbone: Box<dyn Backbone>,
    encoder: Option<Box<dyn Encoder>>,
    necks: Option<Box<dyn Neck>>,
    heads: Box<dyn Head>,
    criterions: Criterions,
}

pub fn baseline(parts: ModelParts) -> Result<FgvcModel> {
    Ok(FgvcModel {
        cfg: parts.cfg,
        vs: parts.vs,
        backbone: parts.backbone,
        encoder: parts.encoder,
        necks: parts.necks,
        heads: parts.heads,
        criterions: parts.criterions,
    })
}

impl std::fmt::Debug for FgvcModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FgvcModel")
            .field("name", &self.cfg.name)
            .field("class_num", &self.cfg.class_num)
            .field("encoder", &self.encoder.is_some())
            .field("necks", &self.necks.is_some())
            .field("criterions", &self.criterions.names().collect::<Vec<_>>())
            .finish()
    }
}

impl FgvcModel {
    pub fn vs(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn vs_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn class_num(&self) -> i64 {
        self.cfg.class_num
    }

    pub fn encoder(&self) -> Option<&dyn Encoder> {
        self.encoder.as_deref()
    }

    pub fn necks(&self) -> Option<&dyn Neck> {
        self.necks.as_deref()
    }

    pub fn criterions(&self) -> &Criterions {
        &self.criterions
    }

    /// Trainable parameters with their qualified names and component tags,
    /// sorted by name.
    pub fn named_parameters(&self) -> Vec<(String, ComponentTag, Tensor)> {
        let mut params: Vec<_> = self
            .vs
            .variables()
            .into_iter()
            .filter(|(_, t)| t.requires_grad())
            .map(|(name, t)| {
                let tag = ComponentTag::of_parameter(&name);
                (name, tag, t)
            })
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
    }

    /// Logits and the configured loss terms for a labelled batch.
    pub fn forward_with_losses(&self, xs: &Tensor, targets: &Tensor, train: bool) -> (Tensor, Vec<LossItem>) {
        let logits = self.forward_t(xs, train);
        let losses = self.criterions.compute(&logits, targets);
        (logits, losses)
    }
}

impl nn::ModuleT for FgvcModel {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut x = self.backbone.forward_t(xs, train);
        if let Some(necks) = &self.necks {
            x = necks.forward_t(&x, train);
        }
        if let Some(encoder) = &self.encoder {
            x = encoder.forward_t(&x, train);
        }
        self.heads.forward_t(&x, train)
    }
}

/// Access to the model underneath any multi-device wrapper.
pub trait AsModule {
    fn module(&self) -> &FgvcModel;
}

impl AsModule for FgvcModel {
    fn module(&self) -> &FgvcModel {
        self
    }
}

/// A model replicated over several devices. Only the wrapping is recorded
/// here; builders unwrap it through `AsModule`.
#[derive(Debug)]
pub struct DataParallel {
    module: FgvcModel,
    devices: Vec<Device>,
}

impl DataParallel {
    pub fn new(module: FgvcModel, devices: Vec<Device>) -> Self {
        Self { module, devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn into_inner(self) -> FgvcModel {
        self.module
    }
}

impl AsModule for DataParallel {
    fn module(&self) -> &FgvcModel {
        &self.module
    }
}
