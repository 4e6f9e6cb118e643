//! The training loop.
//!
//! Each step runs clear-gradients, forward, loss, backward and update, in that order, on a single
//! batch. Clearing happens inside [`Trainer::step`] itself, so gradients from one batch can never
//! leak into the next.

use std::time::Instant;

use log::{info, trace};
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{Batch, Dataset};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::optim::Sgd;

/// Where the current (or most recent) training step got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Gradients are cleared and a batch is ready to go through the network.
    BatchAvailable,
    ForwardDone,
    LossComputed,
    GradientsComputed,
    ParametersUpdated,
}

impl Phase {
    pub fn next(self) -> Phase {
        match self {
            Phase::BatchAvailable => Phase::ForwardDone,
            Phase::ForwardDone => Phase::LossComputed,
            Phase::LossComputed => Phase::GradientsComputed,
            Phase::GradientsComputed => Phase::ParametersUpdated,
            Phase::ParametersUpdated => Phase::BatchAvailable,
        }
    }
}

/// Per-epoch training statistics returned by [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Mean of the per-batch training losses over the epoch.
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    /// Fraction of validation examples classified correctly, in [0, 1].
    pub val_accuracy: Option<f64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean loss over every example.
    pub loss: f64,
    pub accuracy: f64,
}

pub struct Trainer {
    network: Network,
    optimizer: Sgd,
    phase: Phase,
}

impl Trainer {
    pub fn new(network: Network, optimizer: Sgd) -> Trainer {
        Trainer {
            network,
            optimizer,
            phase: Phase::ParametersUpdated,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), to, "training step out of order");
        self.phase = to;
    }

    /// Runs one full training step on `batch` and returns its loss.
    ///
    /// On error the step stops where it failed and the parameters are left untouched; the next
    /// call starts over from clearing the gradients.
    pub fn step(&mut self, batch: &Batch) -> Result<f64> {
        self.phase = Phase::ParametersUpdated;
        self.network.zero_grad();
        self.advance(Phase::BatchAvailable);

        let trace = self.network.forward_train(&batch.inputs)?;
        self.advance(Phase::ForwardDone);

        let loss = self.network.head().loss();
        let (value, d_output) = loss.evaluate_with_grad(trace.output(), &batch.labels)?;
        self.advance(Phase::LossComputed);

        self.network.backward(&trace, &d_output)?;
        if !self.network.gradients_are_finite() {
            return Err(Error::NonFinite { what: "gradient" });
        }
        self.advance(Phase::GradientsComputed);

        self.optimizer.step(&mut self.network);
        self.advance(Phase::ParametersUpdated);

        trace!("step on {} examples, loss {value:.6}", batch.len());
        Ok(value)
    }

    /// Trains for `epochs` passes over `train`, shuffling every epoch. When `validation` is given
    /// it is evaluated after each epoch.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
        epochs: usize,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vec<EpochStats>> {
        if train.is_empty() {
            return Err(Error::InvalidConfig("training set is empty".to_owned()));
        }
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }

        let mut history = Vec::with_capacity(epochs);
        for epoch in 1..=epochs {
            let started = Instant::now();

            let mut running_loss = 0.0;
            let mut steps = 0;
            for batch in train.batches(batch_size, rng) {
                running_loss += self.step(&batch)?;
                steps += 1;
            }
            let train_loss = running_loss / steps as f64;

            let evaluation = validation
                .filter(|data| !data.is_empty())
                .map(|data| self.evaluate(data, batch_size))
                .transpose()?;

            let stats = EpochStats {
                epoch,
                total_epochs: epochs,
                train_loss,
                val_loss: evaluation.map(|e| e.loss),
                val_accuracy: evaluation.map(|e| e.accuracy),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };

            match evaluation {
                Some(e) => info!(
                    "epoch {epoch}/{epochs}: training loss {train_loss:.4}, validation loss {:.4}, validation accuracy {:.2}%",
                    e.loss,
                    e.accuracy * 100.0
                ),
                None => info!("epoch {epoch}/{epochs}: training loss {train_loss:.4}"),
            }

            history.push(stats);
        }

        Ok(history)
    }

    /// Mean loss and accuracy of the current network over `data`. Doesn't touch the gradients.
    pub fn evaluate(&self, data: &Dataset, batch_size: usize) -> Result<Evaluation> {
        evaluate(&self.network, data, batch_size)
    }
}

pub fn evaluate(network: &Network, data: &Dataset, batch_size: usize) -> Result<Evaluation> {
    if data.is_empty() {
        return Err(Error::InvalidConfig("evaluation set is empty".to_owned()));
    }

    let loss = network.head().loss();
    let mut total_loss = 0.0;
    let mut correct = 0;
    for batch in data.batches_in_order(batch_size) {
        let scores = network.forward(&batch.inputs)?;
        // Batch losses are means, so weight them by batch size to get the mean over examples.
        total_loss += loss.evaluate(&scores, &batch.labels)? * batch.len() as f64;
        correct += scores
            .rows()
            .into_iter()
            .zip(&batch.labels)
            .filter(|(row, label)| crate::network::argmax(row.iter()) == **label)
            .count();
    }

    Ok(Evaluation {
        loss: total_loss / data.len() as f64,
        accuracy: correct as f64 / data.len() as f64,
    })
}
