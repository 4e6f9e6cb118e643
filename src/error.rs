use thiserror::Error;

/// Everything that can go wrong while loading data, configuring or training a network.
#[derive(Debug, Error)]
pub enum Error {
    /// A batch, label vector or parameter does not have the shape the network expects.
    #[error("shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("label {label} at row {row} is outside the valid class range 0..{num_classes}")]
    LabelOutOfRange {
        row: usize,
        label: usize,
        num_classes: usize,
    },

    /// A loss or gradient evaluated to NaN or infinity.
    #[error("non-finite {what} encountered")]
    NonFinite { what: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The IDX files are truncated or carry the wrong magic numbers.
    #[error("malformed IDX data: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
