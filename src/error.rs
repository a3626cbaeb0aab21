use std::path::PathBuf;

/// Failures while fetching or decoding the exported classifier.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model export {path} is {bytes} bytes, limit is {limit}")]
    TooLarge { path: PathBuf, bytes: u64, limit: u64 },

    #[error("model export is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported model type: expected {expected}, got {actual}")]
    UnsupportedModelType {
        expected: &'static str,
        actual: String,
    },

    #[error("malformed model export: {reason}")]
    Malformed { reason: String },
}
