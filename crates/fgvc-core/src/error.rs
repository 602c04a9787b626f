use thiserror::Error;

#[derive(Error, Debug)]
pub enum FgvcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("No {category} registered under name '{name}'")]
    NotFound { category: String, name: String },

    #[error("A {category} is already registered under name '{name}'")]
    AlreadyRegistered { category: String, name: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing argument '{key}' for {component}")]
    MissingArg { component: String, key: String },

    #[error("Invalid argument '{key}' for {component}: {reason}")]
    InvalidArg {
        component: String,
        key: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, FgvcError>;
