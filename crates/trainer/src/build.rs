//! Turns configuration sections into live components.

use serde_yaml::Value;
use tch::{nn, Device};

use datasets::{Compose, DataLoader, DatasetOptions, FgvcDataset, Sampler, Split};
use fgvc_core::config::{
    DatasetConfig, LoggerConfig, ModeConfig, ModelConfig, NamedConfig, OptimizerConfig, RootConfig, SamplerConfig,
    TransformsConfig,
};
use fgvc_core::backbones::Backbone;
use fgvc_core::criterions::{Criterion, Criterions};
use fgvc_core::encoders::Encoder;
use fgvc_core::necks::Neck;
use fgvc_core::safetensors_util::load_safetensors;
use fgvc_core::{Args, AsModule, ComponentTag, FgvcError, FgvcModel, ModelParts, Result};

use crate::evaluate::EvaluateFunction;
use crate::interpreter::Interpreter;
use crate::logger::Logger;
use crate::lr_schedule::{LrSchedule, ScheduleSpan};
use crate::metrics::Metric;
use crate::optim::{self, GroupedOptimizer};
use crate::registries::Registries;
use crate::update::UpdateFunction;

/// Assembles backbone, optional necks, optional encoder, heads and
/// criterions, each under its own tagged var-store path, and hands them to
/// the registered model constructor.
pub fn build_model(registries: &Registries, cfg: &ModelConfig, device: Device) -> Result<FgvcModel> {
    let mut vs = nn::VarStore::new(device);
    let (backbone, necks, encoder, heads) = {
        let root = vs.root();

        let backbone_builder = registries.backbones.get(&cfg.backbone.name)?;
        let backbone = backbone_builder(&ComponentTag::Backbone.path(&root), &cfg.backbone.args)?;
        let mut channels = backbone.out_channels();

        let necks = if cfg.necks.is_enabled() {
            let builder = registries.necks.get(&cfg.necks.name)?;
            let necks = builder(&ComponentTag::Necks.path(&root), channels, &cfg.necks.args)?;
            channels = necks.out_channels();
            Some(necks)
        } else {
            None
        };

        let encoder = if cfg.encoder.is_enabled() {
            let builder = registries.encoders.get(&cfg.encoder.name)?;
            let encoder = builder(&ComponentTag::Encoder.path(&root), channels, &cfg.encoder.args)?;
            channels = encoder.out_dim();
            Some(encoder)
        } else {
            None
        };

        let heads_builder = registries.heads.get(&cfg.heads.name)?;
        let heads = heads_builder(&ComponentTag::Heads.path(&root), channels, cfg.class_num, &cfg.heads.args)?;
        (backbone, necks, encoder, heads)
    };

    load_pretrained(&mut vs, &cfg.backbone)?;

    let mut criterions = Criterions::new();
    for item in &cfg.criterions {
        let builder = registries.criterions.get(&item.name)?;
        criterions.insert(item.name.clone(), builder(&item.args)?, item.w)?;
    }

    let model_builder = registries.models.get(&cfg.name)?;
    let model = model_builder(ModelParts {
        cfg: cfg.clone(),
        vs,
        backbone,
        encoder,
        necks,
        heads,
        criterions,
    })?;
    log::info!("built {:?}", model);
    Ok(model)
}

/// `BACKBONE.ARGS.pretrained` names a safetensors file with backbone
/// weights stored without the `backbone.` prefix.
fn load_pretrained(vs: &mut nn::VarStore, backbone: &NamedConfig) -> Result<()> {
    match backbone.args.raw("pretrained") {
        None | Some(Value::Bool(false)) => Ok(()),
        Some(Value::String(path)) => {
            load_safetensors(vs, path, ComponentTag::Backbone.as_str())?;
            Ok(())
        }
        Some(_) => Err(FgvcError::InvalidArg {
            component: backbone.name.clone(),
            key: "pretrained".to_string(),
            reason: "expected the path of a safetensors file".to_string(),
        }),
    }
}

pub fn build_transforms(registries: &Registries, cfg: &TransformsConfig, split: Split) -> Result<Compose> {
    let items = match split {
        Split::Train => &cfg.train,
        Split::Test => &cfg.test,
    };
    Compose::from_config(&registries.transforms, items)
}

pub fn build_dataset(registries: &Registries, cfg: &DatasetConfig, split: Split) -> Result<Box<dyn FgvcDataset>> {
    let builder = registries.datasets.get(&cfg.name)?;
    builder(&DatasetOptions {
        root: cfg.root.clone().into(),
        split,
        download: cfg.download,
    })
}

/// The configured sampler for `split`. An empty name falls back to the
/// split's `SHUFFLE` flag.
pub fn build_sampler(registries: &Registries, cfg: &SamplerConfig, mode: &ModeConfig, split: Split) -> Result<Sampler> {
    let named = match split {
        Split::Train => &cfg.train,
        Split::Test => &cfg.test,
    };
    let name = if named.is_enabled() {
        named.name.as_str()
    } else if mode.shuffle {
        "random_sampler"
    } else {
        "sequential_sampler"
    };
    let builder = registries.samplers.get(name)?;
    builder(&named.args)
}

pub fn build_dataloader(registries: &Registries, cfg: &RootConfig, split: Split) -> Result<DataLoader> {
    let mode = match split {
        Split::Train => &cfg.dataset.train,
        Split::Test => &cfg.dataset.test,
    };
    let dataset = build_dataset(registries, &cfg.dataset, split)?;
    let transforms = build_transforms(registries, &cfg.transforms, split)?;
    let sampler = build_sampler(registries, &cfg.sampler, mode, split)?;
    DataLoader::new(dataset, transforms, sampler, mode.batch_size, mode.num_workers, mode.pin_memory)
}

/// Builds the registered optimizer over the unwrapped model with one lr
/// group per component.
pub fn build_optimizer<M: AsModule + ?Sized>(
    registries: &Registries,
    cfg: &OptimizerConfig,
    model: &M,
) -> Result<GroupedOptimizer> {
    let builder = registries.optimizers.get(&cfg.name)?;
    optim::build_grouped(*builder, model.module(), &cfg.lr, &cfg.args)
}

pub fn build_criterion(registries: &Registries, name: &str, args: &Args) -> Result<Box<dyn Criterion>> {
    let builder = registries.criterions.get(name)?;
    builder(args)
}

pub fn build_metrics(registries: &Registries, cfg: &RootConfig) -> Result<Vec<Box<dyn Metric>>> {
    cfg.metrics
        .iter()
        .map(|item| {
            let builder = registries.metrics.get(&item.metric)?;
            builder(item)
        })
        .collect()
}

/// `None` when `LR_SCHEDULE` is absent or has an empty name.
pub fn build_lr_schedule(
    registries: &Registries,
    cfg: &RootConfig,
    batches_per_epoch: usize,
) -> Result<Option<Box<dyn LrSchedule>>> {
    let Some(schedule) = cfg.lr_schedule.as_ref().filter(|s| s.is_enabled()) else {
        return Ok(None);
    };
    let builder = registries.lr_schedules.get(&schedule.name)?;
    let span = ScheduleSpan {
        epochs: cfg.epoch_num,
        batches_per_epoch,
    };
    builder(span, &schedule.args).map(Some)
}

/// `None` when `INTERPRETER.NAME` is empty.
pub fn build_interpreter(registries: &Registries, cfg: &NamedConfig) -> Result<Option<Box<dyn Interpreter>>> {
    if !cfg.is_enabled() {
        return Ok(None);
    }
    let builder = registries.interpreters.get(&cfg.name)?;
    builder(&cfg.args).map(Some)
}

pub fn build_logger(registries: &Registries, cfg: &LoggerConfig, exp_name: &str) -> Result<Box<dyn Logger>> {
    let builder = registries.loggers.get(&cfg.name)?;
    builder(cfg, exp_name)
}

pub fn build_update_function(registries: &Registries, cfg: &RootConfig) -> Result<UpdateFunction> {
    registries.update_functions.get(&cfg.update_function).copied()
}

pub fn build_evaluate_function(registries: &Registries, cfg: &RootConfig) -> Result<EvaluateFunction> {
    registries.evaluate_functions.get(&cfg.evaluate_function).copied()
}
