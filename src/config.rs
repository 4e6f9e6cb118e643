use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mnist::Normalization;
use crate::network::Head;

/// Everything a training run needs to know. Every field has a default, so a JSON config only
/// has to mention what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Input dimension, hidden widths, number of classes.
    pub layer_sizes: Vec<usize>,
    pub head: Head,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for weight initialization and shuffling. A fresh seed is drawn when absent.
    pub seed: Option<u64>,
    pub data_dir: PathBuf,
    /// Number of training examples held out (from the end) for per-epoch validation.
    pub validation_size: usize,
    pub normalization: Normalization,
    /// Where to write the trained network, if anywhere.
    pub checkpoint: Option<PathBuf>,
    /// Where to write the per-epoch statistics as JSON, if anywhere.
    pub history: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            layer_sizes: vec![784, 128, 64, 10],
            head: Head::LogSoftmax,
            learning_rate: 0.003,
            epochs: 5,
            batch_size: 64,
            seed: None,
            data_dir: PathBuf::from("data"),
            validation_size: 0,
            normalization: Normalization::default(),
            checkpoint: None,
            history: None,
        }
    }
}

impl TrainConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<TrainConfig> {
        let reader = BufReader::new(File::open(path)?);
        let config: TrainConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layer_sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "layer_sizes needs at least an input and an output size".to_owned(),
            ));
        }
        if self.layer_sizes.contains(&0) {
            return Err(Error::InvalidConfig("layer sizes must be > 0".to_owned()));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(
                "learning_rate must be finite and > 0".to_owned(),
            ));
        }
        if !(self.normalization.std.is_finite() && self.normalization.std > 0.0)
            || !self.normalization.mean.is_finite()
        {
            return Err(Error::InvalidConfig(
                "normalization needs a finite mean and a finite std > 0".to_owned(),
            ));
        }
        Ok(())
    }
}
