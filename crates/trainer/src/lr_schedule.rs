//! Per-iteration learning-rate factors.

use std::f64::consts::PI;

use fgvc_core::{Args, FgvcError, Registry, Result};

use crate::optim::GroupedOptimizer;

pub trait LrSchedule: std::fmt::Debug {
    /// Multiplier applied to every group's base rate at `iteration`.
    fn factor(&self, iteration: usize) -> f64;

    fn step(&self, iteration: usize, optimizer: &mut GroupedOptimizer) {
        optimizer.set_lr_factor(self.factor(iteration));
    }
}

/// Length of the run the schedule spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpan {
    pub epochs: usize,
    pub batches_per_epoch: usize,
}

impl ScheduleSpan {
    pub fn total_steps(&self) -> usize {
        self.epochs * self.batches_per_epoch
    }
}

pub type LrScheduleBuilder = fn(ScheduleSpan, &Args) -> Result<Box<dyn LrSchedule>>;

pub fn register_defaults(registry: &mut Registry<LrScheduleBuilder>) -> Result<()> {
    registry.register("cosine_anneal_schedule", cosine_anneal_schedule)?;
    registry.register("warmup_linear_schedule", warmup_linear_schedule)?;
    registry.register("warmup_cosine_schedule", warmup_cosine_schedule)?;
    Ok(())
}

fn steps_arg(args: &Args, component: &str, key: &str, default: usize) -> Result<usize> {
    match args.i64(component, key)? {
        None => Ok(default),
        Some(v) if v >= 0 => Ok(v as usize),
        Some(v) => Err(FgvcError::InvalidArg {
            component: component.to_string(),
            key: key.to_string(),
            reason: format!("must not be negative, got {}", v),
        }),
    }
}

#[derive(Debug)]
pub struct CosineAnneal {
    total: usize,
}

impl LrSchedule for CosineAnneal {
    fn factor(&self, iteration: usize) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let t = iteration.min(self.total) as f64;
        0.5 * (1.0 + (PI * t / self.total as f64).cos())
    }
}

pub fn cosine_anneal_schedule(span: ScheduleSpan, _args: &Args) -> Result<Box<dyn LrSchedule>> {
    Ok(Box::new(CosineAnneal {
        total: span.total_steps(),
    }))
}

#[derive(Debug)]
pub struct WarmupLinear {
    warmup: usize,
    total: usize,
}

impl LrSchedule for WarmupLinear {
    fn factor(&self, iteration: usize) -> f64 {
        if iteration < self.warmup {
            return iteration as f64 / self.warmup.max(1) as f64;
        }
        let remaining = self.total.saturating_sub(iteration) as f64;
        let decay = self.total.saturating_sub(self.warmup).max(1) as f64;
        (remaining / decay).max(0.0)
    }
}

pub fn warmup_linear_schedule(span: ScheduleSpan, args: &Args) -> Result<Box<dyn LrSchedule>> {
    let c = "warmup_linear_schedule";
    Ok(Box::new(WarmupLinear {
        warmup: steps_arg(args, c, "warmup_steps", 0)?,
        total: steps_arg(args, c, "total_steps", span.total_steps())?,
    }))
}

#[derive(Debug)]
pub struct WarmupCosine {
    warmup: usize,
    total: usize,
    cycles: f64,
}

impl LrSchedule for WarmupCosine {
    fn factor(&self, iteration: usize) -> f64 {
        if iteration < self.warmup {
            return iteration as f64 / self.warmup.max(1) as f64;
        }
        let decay = self.total.saturating_sub(self.warmup).max(1) as f64;
        let progress = (iteration - self.warmup) as f64 / decay;
        (0.5 * (1.0 + (PI * self.cycles * 2.0 * progress).cos())).max(0.0)
    }
}

pub fn warmup_cosine_schedule(span: ScheduleSpan, args: &Args) -> Result<Box<dyn LrSchedule>> {
    let c = "warmup_cosine_schedule";
    Ok(Box::new(WarmupCosine {
        warmup: steps_arg(args, c, "warmup_steps", 0)?,
        total: steps_arg(args, c, "total_steps", span.total_steps())?,
        cycles: args.f64(c, "cycles")?.unwrap_or(0.5),
    }))
}
