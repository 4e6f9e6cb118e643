//! Trains the reference 784-128-64-10 network on the real MNIST files.
//!
//! Needs the four IDX files in `MNIST_DATA_DIR` (default `data`), so it only runs on request:
//! `cargo test --release -- --ignored`.

use digit_trainer::{Head, MnistData, Network, Normalization, Sgd, Trainer};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

#[test]
#[ignore]
fn reference_run_loss_curve() {
    let dir = std::env::var("MNIST_DATA_DIR").unwrap_or_else(|_| "data".to_owned());
    let data = MnistData::load(dir, Normalization::default()).unwrap();

    let mut rng = StdRng::seed_from_u64(2024);
    let network = Network::new_with_rng(&[784, 128, 64, 10], Head::LogSoftmax, &mut rng).unwrap();
    let mut trainer = Trainer::new(network, Sgd::new(0.003).unwrap());

    let history = trainer.fit(&data.training_data, None, 5, 64, &mut rng).unwrap();
    let losses: Vec<f64> = history.iter().map(|stats| stats.train_loss).collect();

    assert!(losses[0] > 1.5, "first epoch loss {}", losses[0]);
    assert!(losses[4] < 0.5, "last epoch loss {}", losses[4]);
    assert!(
        losses.windows(2).all(|pair| pair[1] < pair[0]),
        "loss not monotone: {losses:?}"
    );

    let test = trainer.evaluate(&data.test_data, 256).unwrap();
    assert!(test.accuracy > 0.85, "test accuracy {}", test.accuracy);
}
