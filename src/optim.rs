use crate::error::{Error, Result};
use crate::network::Network;

/// Plain stochastic gradient descent: no momentum, no adaptive scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Result<Sgd> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {learning_rate}"
            )));
        }
        Ok(Sgd { learning_rate })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Moves every parameter by `-learning_rate * grad` in place. The accumulators are left as
    /// they are; clearing them is the training step's job.
    pub fn step(&self, network: &mut Network) {
        for parameter in network.parameters_mut() {
            parameter
                .value
                .scaled_add(-self.learning_rate, &parameter.grad);
        }
    }
}
