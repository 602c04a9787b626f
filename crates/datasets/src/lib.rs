pub mod cub;
pub mod dataset;
pub mod download;
pub mod extract;
pub mod image_folder;
pub mod loader;
pub mod samplers;
pub mod transforms;

pub use dataset::{CategoryIndex, DatasetBuilder, DatasetOptions, FgvcDataset, Sample, Split};
pub use loader::{Batch, DataLoader};
pub use samplers::Sampler;
pub use transforms::Compose;
