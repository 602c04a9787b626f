use datasets::dataset::DatasetBuilder;
use datasets::samplers::SamplerBuilder;
use datasets::transforms::TransformBuilder;
use fgvc_core::backbones::BackboneBuilder;
use fgvc_core::criterions::CriterionBuilder;
use fgvc_core::encoders::EncoderBuilder;
use fgvc_core::heads::HeadBuilder;
use fgvc_core::model::ModelBuilder;
use fgvc_core::necks::NeckBuilder;
use fgvc_core::{Registry, Result};

use crate::evaluate::EvaluateFunction;
use crate::interpreter::InterpreterBuilder;
use crate::logger::LoggerBuilder;
use crate::lr_schedule::LrScheduleBuilder;
use crate::metrics::MetricBuilder;
use crate::optim::OptimizerBuilder;
use crate::update::UpdateFunction;

/// Every name a configuration may refer to, one table per category.
pub struct Registries {
    pub models: Registry<ModelBuilder>,
    pub backbones: Registry<BackboneBuilder>,
    pub encoders: Registry<EncoderBuilder>,
    pub necks: Registry<NeckBuilder>,
    pub heads: Registry<HeadBuilder>,
    pub criterions: Registry<CriterionBuilder>,
    pub datasets: Registry<DatasetBuilder>,
    pub samplers: Registry<SamplerBuilder>,
    pub transforms: Registry<TransformBuilder>,
    pub metrics: Registry<MetricBuilder>,
    pub optimizers: Registry<OptimizerBuilder>,
    pub interpreters: Registry<InterpreterBuilder>,
    pub lr_schedules: Registry<LrScheduleBuilder>,
    pub update_functions: Registry<UpdateFunction>,
    pub evaluate_functions: Registry<EvaluateFunction>,
    pub loggers: Registry<LoggerBuilder>,
}

impl Registries {
    /// Empty tables; callers register their own components.
    pub fn new() -> Self {
        Self {
            models: Registry::new("model"),
            backbones: Registry::new("backbone"),
            encoders: Registry::new("encoder"),
            necks: Registry::new("necks"),
            heads: Registry::new("heads"),
            criterions: Registry::new("criterion"),
            datasets: Registry::new("dataset"),
            samplers: Registry::new("sampler"),
            transforms: Registry::new("transform"),
            metrics: Registry::new("metric"),
            optimizers: Registry::new("optimizer"),
            interpreters: Registry::new("interpreter"),
            lr_schedules: Registry::new("lr_schedule"),
            update_functions: Registry::new("update_function"),
            evaluate_functions: Registry::new("evaluate_function"),
            loggers: Registry::new("logger"),
        }
    }

    /// Every built-in component under its configuration name.
    pub fn with_defaults() -> Result<Self> {
        let mut r = Self::new();
        fgvc_core::model::register_defaults(&mut r.models)?;
        fgvc_core::backbones::register_defaults(&mut r.backbones)?;
        fgvc_core::encoders::register_defaults(&mut r.encoders)?;
        fgvc_core::necks::register_defaults(&mut r.necks)?;
        fgvc_core::heads::register_defaults(&mut r.heads)?;
        fgvc_core::criterions::register_defaults(&mut r.criterions)?;
        datasets::dataset::register_defaults(&mut r.datasets)?;
        datasets::samplers::register_defaults(&mut r.samplers)?;
        datasets::transforms::register_defaults(&mut r.transforms)?;
        crate::metrics::register_defaults(&mut r.metrics)?;
        crate::optim::register_defaults(&mut r.optimizers)?;
        crate::interpreter::register_defaults(&mut r.interpreters)?;
        crate::lr_schedule::register_defaults(&mut r.lr_schedules)?;
        crate::update::register_defaults(&mut r.update_functions)?;
        crate::evaluate::register_defaults(&mut r.evaluate_functions)?;
        crate::logger::register_defaults(&mut r.loggers)?;
        Ok(r)
    }

    /// `(category, names)` for every table, in declaration order.
    pub fn catalog(&self) -> Vec<(&'static str, Vec<&str>)> {
        vec![
            (self.models.category(), self.models.names()),
            (self.backbones.category(), self.backbones.names()),
            (self.encoders.category(), self.encoders.names()),
            (self.necks.category(), self.necks.names()),
            (self.heads.category(), self.heads.names()),
            (self.criterions.category(), self.criterions.names()),
            (self.datasets.category(), self.datasets.names()),
            (self.samplers.category(), self.samplers.names()),
            (self.transforms.category(), self.transforms.names()),
            (self.metrics.category(), self.metrics.names()),
            (self.optimizers.category(), self.optimizers.names()),
            (self.interpreters.category(), self.interpreters.names()),
            (self.lr_schedules.category(), self.lr_schedules.names()),
            (self.update_functions.category(), self.update_functions.names()),
            (self.evaluate_functions.category(), self.evaluate_functions.names()),
            (self.loggers.category(), self.loggers.names()),
        ]
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
