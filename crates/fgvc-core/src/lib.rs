pub mod args;
pub mod backbones;
pub mod checkpoint;
pub mod config;
pub mod criterions;
pub mod encoders;
pub mod error;
pub mod heads;
pub mod model;
pub mod necks;
pub mod registry;
pub mod safetensors_util;
pub mod tag;

pub use args::Args;
pub use config::RootConfig;
pub use error::{FgvcError, Result};
pub use model::{AsModule, DataParallel, FgvcModel, ModelParts};
pub use registry::Registry;
pub use tag::ComponentTag;
