use std::env;
use std::fs::File;
use std::io::BufWriter;

use log::{debug, info};
use ndarray::{Axis, s};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

use digit_trainer::{MnistData, Network, Result, Sgd, TrainConfig, Trainer};

fn main() -> Result<()> {
    env_logger::init();

    // An optional JSON config path as the only argument; MNIST_DATA_DIR overrides its data_dir.
    let mut config = match env::args().nth(1) {
        Some(path) => TrainConfig::load_json(path)?,
        None => TrainConfig::default(),
    };
    if let Ok(dir) = env::var("MNIST_DATA_DIR") {
        config.data_dir = dir.into();
    }
    config.validate()?;
    debug!("{config:?}");

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let MnistData {
        mut training_data,
        test_data,
    } = MnistData::load(&config.data_dir, config.normalization)?;
    let validation_data = if config.validation_size > 0 {
        let at = training_data.len().saturating_sub(config.validation_size);
        Some(training_data.split_off(at)?)
    } else {
        None
    };
    info!(
        "training on {} examples, validating on {}, testing on {}",
        training_data.len(),
        validation_data.as_ref().map_or(0, |data| data.len()),
        test_data.len()
    );

    let network = Network::new_with_rng(&config.layer_sizes, config.head, &mut rng)?;
    let mut trainer = Trainer::new(network, Sgd::new(config.learning_rate)?);
    let history = trainer.fit(
        &training_data,
        validation_data.as_ref(),
        config.epochs,
        config.batch_size,
        &mut rng,
    )?;

    let test = trainer.evaluate(&test_data, config.batch_size)?;
    info!(
        "test loss {:.4}, test accuracy {:.2}%",
        test.loss,
        test.accuracy * 100.0
    );

    // Report the class probabilities for the first test image.
    let network = trainer.into_network();
    if !test_data.is_empty() {
        let first = test_data.images().slice(s![0..1, ..]).to_owned();
        let probabilities = network.probabilities(&first)?;
        let predicted = network.predict(&first)?[0];
        info!(
            "first test image: label {}, predicted {predicted}, probabilities {:.3}",
            test_data.labels()[0],
            probabilities.index_axis(Axis(0), 0)
        );
    }

    if let Some(path) = &config.history {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &history)?;
        info!("wrote training history to {}", path.display());
    }
    if let Some(path) = &config.checkpoint {
        network.save_json(path)?;
        info!("saved network to {}", path.display());
    }

    Ok(())
}
