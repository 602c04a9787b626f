pub mod build;
pub mod evaluate;
pub mod interpreter;
pub mod logger;
pub mod lr_schedule;
pub mod metrics;
pub mod optim;
pub mod registries;
pub mod save;
pub mod train;
pub mod update;

pub use optim::{GroupedOptimizer, ParamGroup};
pub use registries::Registries;
pub use train::Trainer;
