use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::args::Args;
use crate::error::{FgvcError, Result};

/// Root of a run configuration, as read from one YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RootConfig {
    #[serde(default = "default_exp_name")]
    pub exp_name: String,
    /// Run on the first CUDA device when one is available.
    #[serde(default)]
    pub use_cuda: bool,
    /// Dynamic loss scaling in the update step.
    #[serde(default)]
    pub amp: bool,
    #[serde(default = "default_epoch_num")]
    pub epoch_num: usize,
    #[serde(default)]
    pub start_epoch: usize,
    /// Max gradient norm for strategies that clip; `None` disables clipping.
    #[serde(default)]
    pub clip_grad: Option<f64>,
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub transforms: TransformsConfig,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub lr_schedule: Option<NamedConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub interpreter: NamedConfig,
    #[serde(default)]
    pub weight: WeightConfig,
    #[serde(default = "default_update_function")]
    pub update_function: String,
    #[serde(default = "default_evaluate_function")]
    pub evaluate_function: String,
}

/// A `{NAME, ARGS}` pair. An empty name means "disabled" wherever a
/// component is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NamedConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

impl NamedConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Args::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    pub class_num: i64,
    pub backbone: NamedConfig,
    #[serde(default)]
    pub encoder: NamedConfig,
    #[serde(default)]
    pub necks: NamedConfig,
    pub heads: NamedConfig,
    pub criterions: Vec<CriterionConfig>,
}

/// One weighted loss term: `{name, args, w}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionConfig {
    pub name: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default = "default_weight")]
    pub w: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(default)]
    pub args: Args,
    pub lr: LrConfig,
}

/// Learning rate per model component. Components without an entry train at
/// `base`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LrConfig {
    #[serde(default)]
    pub backbone: Option<f64>,
    #[serde(default)]
    pub encoder: Option<f64>,
    #[serde(default)]
    pub necks: Option<f64>,
    #[serde(default)]
    pub heads: Option<f64>,
    pub base: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatasetConfig {
    pub name: String,
    pub root: String,
    #[serde(default)]
    pub download: bool,
    #[serde(default = "ModeConfig::train")]
    pub train: ModeConfig,
    #[serde(default = "ModeConfig::test")]
    pub test: ModeConfig,
}

/// Loader settings for one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModeConfig {
    pub batch_size: usize,
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default)]
    pub pin_memory: bool,
    #[serde(default)]
    pub shuffle: bool,
}

impl ModeConfig {
    pub fn train() -> Self {
        Self {
            batch_size: 16,
            num_workers: 0,
            pin_memory: false,
            shuffle: true,
        }
    }

    pub fn test() -> Self {
        Self {
            batch_size: 16,
            num_workers: 0,
            pin_memory: false,
            shuffle: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SamplerConfig {
    #[serde(default = "default_train_sampler")]
    pub train: NamedConfig,
    #[serde(default = "default_test_sampler")]
    pub test: NamedConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            train: default_train_sampler(),
            test: default_test_sampler(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TransformsConfig {
    #[serde(default)]
    pub train: Vec<TransformConfig>,
    #[serde(default)]
    pub test: Vec<TransformConfig>,
}

/// One pipeline stage; every key besides `name` is an argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub name: String,
    #[serde(flatten)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub metric: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LoggerConfig {
    #[serde(default = "default_logger_name")]
    pub name: String,
    #[serde(default = "default_log_dir")]
    pub file_path: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: default_logger_name(),
            file_path: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WeightConfig {
    /// Checkpoint file name; empty disables saving.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
    /// Checkpoint to restore before training or evaluation.
    #[serde(default)]
    pub load: Option<String>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            save_dir: default_save_dir(),
            load: None,
        }
    }
}

fn default_exp_name() -> String {
    "fgvc".to_string()
}

fn default_epoch_num() -> usize {
    100
}

fn default_model_name() -> String {
    "baseline".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_train_sampler() -> NamedConfig {
    NamedConfig::new("random_sampler")
}

fn default_test_sampler() -> NamedConfig {
    NamedConfig::new("sequential_sampler")
}

fn default_logger_name() -> String {
    "txt_logger".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_save_dir() -> String {
    "./checkpoints".to_string()
}

fn default_update_function() -> String {
    "general_update".to_string()
}

fn default_evaluate_function() -> String {
    "general_evaluate".to_string()
}

impl RootConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: RootConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything the builders would otherwise trip over halfway
    /// through assembly.
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        require_name("MODEL.NAME", &model.name)?;
        require_name("MODEL.BACKBONE.NAME", &model.backbone.name)?;
        require_name("MODEL.HEADS.NAME", &model.heads.name)?;
        if model.class_num <= 0 {
            return Err(FgvcError::Config(format!(
                "MODEL.CLASS_NUM must be positive, got {}",
                model.class_num
            )));
        }
        if model.criterions.is_empty() {
            return Err(FgvcError::Config("MODEL.CRITERIONS must not be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for item in &model.criterions {
            require_name("MODEL.CRITERIONS[].name", &item.name)?;
            if !item.w.is_finite() {
                return Err(FgvcError::Config(format!("criterion '{}' has a non-finite weight", item.name)));
            }
            if !seen.insert(item.name.as_str()) {
                return Err(FgvcError::Config(format!("criterion '{}' is listed twice", item.name)));
            }
        }

        require_name("DATASET.NAME", &self.dataset.name)?;
        for (split, mode) in [("TRAIN", &self.dataset.train), ("TEST", &self.dataset.test)] {
            if mode.batch_size == 0 {
                return Err(FgvcError::Config(format!("DATASET.{}.BATCH_SIZE must be positive", split)));
            }
        }

        require_name("OPTIMIZER.NAME", &self.optimizer.name)?;
        let lr = &self.optimizer.lr;
        for (key, value) in [
            ("backbone", lr.backbone),
            ("encoder", lr.encoder),
            ("necks", lr.necks),
            ("heads", lr.heads),
            ("base", Some(lr.base)),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(FgvcError::Config(format!("OPTIMIZER.LR.{} must be a non-negative number, got {}", key, v)));
                }
            }
        }

        for metric in &self.metrics {
            require_name("METRICS[].name", &metric.name)?;
            if matches!(metric.top_k, Some(k) if k < 1) {
                return Err(FgvcError::Config(format!("metric '{}' needs top_k >= 1", metric.name)));
            }
        }

        for item in self.transforms.train.iter().chain(&self.transforms.test) {
            require_name("TRANSFORMS[].name", &item.name)?;
        }

        if let Some(max) = self.clip_grad {
            if !(max > 0.0) {
                return Err(FgvcError::Config(format!("CLIP_GRAD must be positive, got {}", max)));
            }
        }

        require_name("UPDATE_FUNCTION", &self.update_function)?;
        require_name("EVALUATE_FUNCTION", &self.evaluate_function)?;
        Ok(())
    }
}

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(FgvcError::Config(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}
