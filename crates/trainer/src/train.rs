use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tch::Device;

use datasets::{DataLoader, Split};
use fgvc_core::{checkpoint, FgvcModel, RootConfig};

use crate::build;
use crate::evaluate::EvaluateFunction;
use crate::interpreter::{Interpretation, Interpreter};
use crate::logger::Logger;
use crate::lr_schedule::LrSchedule;
use crate::metrics::Metric;
use crate::optim::GroupedOptimizer;
use crate::registries::Registries;
use crate::save::save_model;
use crate::update::{LossScaler, StepOptions, UpdateFunction, ITER_LOSS};

const LOG_EVERY: usize = 10;

pub fn select_device(use_cuda: bool) -> Device {
    if use_cuda {
        Device::cuda_if_available()
    } else {
        Device::Cpu
    }
}

/// Everything a training run needs, assembled from one configuration.
pub struct Trainer {
    cfg: RootConfig,
    model: FgvcModel,
    optimizer: GroupedOptimizer,
    schedule: Option<Box<dyn LrSchedule>>,
    update_fn: UpdateFunction,
    evaluate_fn: EvaluateFunction,
    metrics: Vec<Box<dyn Metric>>,
    interpreter: Option<Box<dyn Interpreter>>,
    train_loader: DataLoader,
    test_loader: DataLoader,
    logger: Box<dyn Logger>,
    options: StepOptions,
}

impl Trainer {
    pub fn new(cfg: RootConfig, registries: &Registries) -> Result<Self> {
        let mut logger = build::build_logger(registries, &cfg.logger, &cfg.exp_name)?;
        let device = select_device(cfg.use_cuda);
        logger.log(&format!("Using device: {:?}", device));

        let mut model = build::build_model(registries, &cfg.model, device).context("building model")?;
        if let Some(path) = &cfg.weight.load {
            checkpoint::load(model.vs_mut(), path).with_context(|| format!("loading weights from {}", path))?;
        }

        let train_loader = build::build_dataloader(registries, &cfg, Split::Train).context("building train loader")?;
        let test_loader = build::build_dataloader(registries, &cfg, Split::Test).context("building test loader")?;
        let optimizer = build::build_optimizer(registries, &cfg.optimizer, &model)?;
        let schedule = build::build_lr_schedule(registries, &cfg, train_loader.len())?;
        let update_fn = build::build_update_function(registries, &cfg)?;
        let evaluate_fn = build::build_evaluate_function(registries, &cfg)?;
        let metrics = build::build_metrics(registries, &cfg)?;
        let interpreter = build::build_interpreter(registries, &cfg.interpreter)?;
        let options = StepOptions {
            clip_grad: cfg.clip_grad,
            scaler: cfg.amp.then(LossScaler::default),
        };

        Ok(Self {
            cfg,
            model,
            optimizer,
            schedule,
            update_fn,
            evaluate_fn,
            metrics,
            interpreter,
            train_loader,
            test_loader,
            logger,
            options,
        })
    }

    pub fn model(&self) -> &FgvcModel {
        &self.model
    }

    /// Trains from `START_EPOCH` to `EPOCH_NUM`, evaluating after every epoch
    /// and saving whenever the first metric improves.
    pub fn train(&mut self) -> Result<Option<PathBuf>> {
        self.logger.log(&format!("Starting {} with configuration: {:?}", self.cfg.exp_name, self.cfg.model));
        let batches = self.train_loader.len();
        let mut best: Option<f64> = None;
        let mut saved = None;

        for epoch in self.cfg.start_epoch..self.cfg.epoch_num {
            let mut epoch_loss = 0.0;
            let mut seen = 0;
            for (i, batch) in self.train_loader.iter().enumerate() {
                let iteration = epoch * batches + i;
                if let Some(schedule) = &self.schedule {
                    schedule.step(iteration, &mut self.optimizer);
                }
                let batch = batch?;
                let losses = (self.update_fn)(&self.model, &batch, &mut self.optimizer, &mut self.options)?;
                let loss = losses.get(ITER_LOSS).copied().unwrap_or_default();
                epoch_loss += loss;
                seen += 1;

                if i % LOG_EVERY == 0 {
                    self.logger.log(&format!("Epoch {} | Batch {}/{} | Loss: {:.4}", epoch, i, batches, loss));
                    self.logger.add_scalars(iteration, &losses);
                }
            }
            if seen > 0 {
                self.logger.log(&format!("Epoch {} Average Loss: {:.4}", epoch, epoch_loss / seen as f64));
            }

            let results = self.evaluate()?;
            self.logger.add_scalars(epoch, &results);
            let Some(score) = self.cfg.metrics.first().and_then(|m| results.get(&m.name)).copied() else {
                saved = save_model(&self.cfg.weight, &self.model, self.logger.as_mut())?.or(saved);
                continue;
            };
            if best.map_or(true, |b| score > b) {
                self.logger.log(&format!("Epoch {} improved {} to {:.4}", epoch, self.cfg.metrics[0].name, score));
                best = Some(score);
                saved = save_model(&self.cfg.weight, &self.model, self.logger.as_mut())?.or(saved);
            }
        }
        Ok(saved)
    }

    pub fn evaluate(&mut self) -> Result<BTreeMap<String, f64>> {
        let results = (self.evaluate_fn)(&self.model, &mut self.test_loader, &mut self.metrics)?;
        for (name, value) in &results {
            self.logger.log(&format!("{}: {:.4}", name, value));
        }
        Ok(results)
    }

    /// Runs the configured interpreter on the first test batch.
    pub fn interpret_first_batch(&mut self) -> Result<Option<Interpretation>> {
        let Some(interpreter) = &self.interpreter else {
            return Ok(None);
        };
        let Some(batch) = self.test_loader.iter().next() else {
            return Ok(None);
        };
        let batch = batch?;
        let interpretation = interpreter.interpret(&self.model, &batch.images)?;
        self.logger.log(&format!(
            "Interpreted {} images, predictions {:?}",
            batch.len(),
            Vec::<i64>::try_from(&interpretation.predictions.to_device(Device::Cpu))?
        ));
        Ok(Some(interpretation))
    }

    pub fn close(mut self) {
        self.logger.close();
    }
}
