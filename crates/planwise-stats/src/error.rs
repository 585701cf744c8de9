use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
