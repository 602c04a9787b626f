//! Optimizers with one learning rate per model component.

use std::collections::BTreeMap;
use tch::nn::{self, OptimizerConfig};

use fgvc_core::config::LrConfig;
use fgvc_core::{Args, AsModule, ComponentTag, FgvcModel, Registry, Result};

/// One trainable parameter and the learning rate it trains at.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub name: String,
    pub tag: ComponentTag,
    pub lr: f64,
}

pub type OptimizerBuilder = fn(&nn::VarStore, f64, &Args) -> Result<nn::Optimizer>;

pub fn register_defaults(registry: &mut Registry<OptimizerBuilder>) -> Result<()> {
    registry.register("sgd", sgd)?;
    registry.register("adam", adam)?;
    registry.register("adamw", adamw)?;
    Ok(())
}

pub fn sgd(vs: &nn::VarStore, lr: f64, args: &Args) -> Result<nn::Optimizer> {
    let c = "sgd";
    let config = nn::Sgd {
        momentum: args.f64(c, "momentum")?.unwrap_or(0.0),
        dampening: args.f64(c, "dampening")?.unwrap_or(0.0),
        wd: args.f64(c, "weight_decay")?.unwrap_or(0.0),
        nesterov: args.bool(c, "nesterov")?.unwrap_or(false),
    };
    Ok(config.build(vs, lr)?)
}

pub fn adam(vs: &nn::VarStore, lr: f64, args: &Args) -> Result<nn::Optimizer> {
    let c = "adam";
    let config = nn::Adam {
        beta1: args.f64(c, "beta1")?.unwrap_or(0.9),
        beta2: args.f64(c, "beta2")?.unwrap_or(0.999),
        wd: args.f64(c, "weight_decay")?.unwrap_or(0.0),
        eps: args.f64(c, "eps")?.unwrap_or(1e-8),
        amsgrad: args.bool(c, "amsgrad")?.unwrap_or(false),
    };
    Ok(config.build(vs, lr)?)
}

pub fn adamw(vs: &nn::VarStore, lr: f64, args: &Args) -> Result<nn::Optimizer> {
    let c = "adamw";
    let config = nn::AdamW {
        beta1: args.f64(c, "beta1")?.unwrap_or(0.9),
        beta2: args.f64(c, "beta2")?.unwrap_or(0.999),
        wd: args.f64(c, "weight_decay")?.unwrap_or(0.01),
        eps: args.f64(c, "eps")?.unwrap_or(1e-8),
        amsgrad: args.bool(c, "amsgrad")?.unwrap_or(false),
    };
    Ok(config.build(vs, lr)?)
}

/// Learning rate configured for a component; unset components use `base`.
pub fn lr_for(tag: ComponentTag, lr: &LrConfig) -> f64 {
    let specific = match tag {
        ComponentTag::Backbone => lr.backbone,
        ComponentTag::Encoder => lr.encoder,
        ComponentTag::Necks => lr.necks,
        ComponentTag::Heads => lr.heads,
        ComponentTag::Base => None,
    };
    specific.unwrap_or(lr.base)
}

/// Every trainable parameter of the (possibly wrapped) model, in name order,
/// with the learning rate of its component.
pub fn param_groups<M: AsModule + ?Sized>(model: &M, lr: &LrConfig) -> Vec<ParamGroup> {
    model
        .module()
        .named_parameters()
        .into_iter()
        .map(|(name, tag, _)| ParamGroup {
            name,
            tag,
            lr: lr_for(tag, lr),
        })
        .collect()
}

/// A tch optimizer plus the base learning rate of each var-store group.
pub struct GroupedOptimizer {
    opt: nn::Optimizer,
    base_lrs: BTreeMap<ComponentTag, f64>,
    groups: Vec<ParamGroup>,
    factor: f64,
}

impl std::fmt::Debug for GroupedOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedOptimizer")
            .field("base_lrs", &self.base_lrs)
            .field("params", &self.groups.len())
            .field("factor", &self.factor)
            .finish()
    }
}

impl GroupedOptimizer {
    /// Applies the per-group rates. Only groups that own parameters are
    /// touched; tch creates groups lazily as parameters are added.
    pub fn new(mut opt: nn::Optimizer, groups: Vec<ParamGroup>) -> Self {
        let mut base_lrs = BTreeMap::new();
        for group in &groups {
            base_lrs.entry(group.tag).or_insert(group.lr);
        }
        for (tag, lr) in &base_lrs {
            opt.set_lr_group(tag.group(), *lr);
        }
        Self {
            opt,
            base_lrs,
            groups,
            factor: 1.0,
        }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Base learning rate of the group `tag`, if it owns any parameter.
    pub fn base_lr(&self, tag: ComponentTag) -> Option<f64> {
        self.base_lrs.get(&tag).copied()
    }

    /// Current learning rate of the group `tag`.
    pub fn lr(&self, tag: ComponentTag) -> Option<f64> {
        self.base_lr(tag).map(|lr| lr * self.factor)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Rescales every group to `factor` times its base rate.
    pub fn set_lr_factor(&mut self, factor: f64) {
        self.factor = factor;
        for (tag, lr) in &self.base_lrs {
            self.opt.set_lr_group(tag.group(), lr * factor);
        }
    }

    pub fn zero_grad(&mut self) {
        self.opt.zero_grad();
    }

    pub fn step(&mut self) {
        self.opt.step();
    }

    pub fn clip_grad_norm(&mut self, max: f64) {
        self.opt.clip_grad_norm(max);
    }
}

/// Groups the model's parameters and builds the registered optimizer on top.
pub fn build_grouped(
    builder: OptimizerBuilder,
    model: &FgvcModel,
    lr: &LrConfig,
    args: &Args,
) -> Result<GroupedOptimizer> {
    let groups = param_groups(model, lr);
    let opt = builder(model.vs(), lr.base, args)?;
    for (tag, lr) in groups.iter().map(|g| (g.tag, g.lr)).collect::<BTreeMap<_, _>>() {
        log::info!("optimizer group {} ({}) lr {}", tag.group(), tag, lr);
    }
    Ok(GroupedOptimizer::new(opt, groups))
}
