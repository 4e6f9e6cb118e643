use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array2};
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::{log_softmax, log_softmax_backward, relu, relu_derivative, softmax};
use crate::error::{Error, Result};
use crate::layer::{Linear, Parameter};
use crate::loss::Loss;

/// What the final affine layer's scores are turned into before they leave the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Head {
    /// Raw class scores, trained with cross-entropy.
    Logits,
    /// Log of the normalized class probabilities, trained with negative log-likelihood.
    #[default]
    LogSoftmax,
}

impl Head {
    /// The loss policy that expects this head's output.
    pub fn loss(self) -> Loss {
        match self {
            Head::Logits => Loss::CrossEntropy,
            Head::LogSoftmax => Loss::NegativeLogLikelihood,
        }
    }
}

/// A fully connected feed-forward classifier: every hidden affine layer is followed by a ReLU,
/// the last affine layer produces one score per class.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    sizes: Vec<usize>,
    head: Head,
    layers: Vec<Linear>,
}

/// Intermediate values recorded by [`Network::forward_train`], consumed by
/// [`Network::backward`].
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    // The input each affine layer saw, i.e. the network input followed by every hidden
    // activation.
    layer_inputs: Vec<Array2<f64>>,
    // The pre-activation output of each affine layer.
    weighted_sums: Vec<Array2<f64>>,
    output: Array2<f64>,
}

impl ForwardTrace {
    pub fn output(&self) -> &Array2<f64> {
        &self.output
    }
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    sizes: Vec<usize>,
    head: Head,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array2<f64>>,
}

impl Network {
    /// Builds a network with randomly initialized weights and zero biases. `sizes` lists the
    /// input dimension, every hidden width, then the number of classes.
    pub fn new_with_rng<R: Rng + ?Sized>(sizes: &[usize], head: Head, rng: &mut R) -> Result<Network> {
        check_sizes(sizes)?;
        let layers = sizes
            .iter()
            .zip(sizes.iter().skip(1))
            .map(|(&current_size, &next_size)| Linear::new(current_size, next_size, rng))
            .collect();

        Ok(Network {
            sizes: sizes.to_vec(),
            head,
            layers,
        })
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn head(&self) -> Head {
        self.head
    }

    pub fn input_dim(&self) -> usize {
        self.sizes[0]
    }

    pub fn num_classes(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.layers.iter().flat_map(|layer| [&layer.weight, &layer.bias])
    }

    pub fn parameters_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|layer| [&mut layer.weight, &mut layer.bias])
    }

    pub fn zero_grad(&mut self) {
        self.parameters_mut().for_each(Parameter::zero_grad);
    }

    /// Maps a `[batch x input_dim]` matrix to `[batch x num_classes]` scores without recording
    /// anything for the backward pass.
    pub fn forward(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(input)?;

        let mut activation = self.layers[0].forward(input);
        for layer in &self.layers[1..] {
            activation.mapv_inplace(relu);
            activation = layer.forward(&activation);
        }

        Ok(self.apply_head(activation))
    }

    /// Same as [`Network::forward`], but keeps every layer input and pre-activation so that
    /// gradients can be computed afterwards.
    pub fn forward_train(&self, input: &Array2<f64>) -> Result<ForwardTrace> {
        self.check_input(input)?;

        let mut layer_inputs = Vec::with_capacity(self.layers.len());
        let mut weighted_sums = Vec::with_capacity(self.layers.len());

        let mut activation = input.clone();
        for (index, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            layer_inputs.push(activation);
            // The final layer has no nonlinearity of its own; the head takes its place.
            activation = if index + 1 < self.layers.len() {
                z.mapv(relu)
            } else {
                z.clone()
            };
            weighted_sums.push(z);
        }

        Ok(ForwardTrace {
            layer_inputs,
            weighted_sums,
            output: self.apply_head(activation),
        })
    }

    /// Propagates `d_output` (the gradient of the loss with respect to the network output in
    /// `trace`) back through the network and **adds** each parameter's share to its gradient
    /// accumulator.
    pub fn backward(&mut self, trace: &ForwardTrace, d_output: &Array2<f64>) -> Result<()> {
        if d_output.dim() != trace.output.dim() {
            return Err(Error::ShapeMismatch {
                what: "output gradient",
                expected: trace.output.shape().to_vec(),
                got: d_output.shape().to_vec(),
            });
        }

        // First get the gradient with respect to the last layer's weighted sums. With raw scores
        // those are the output itself; with a log-softmax head the gradient has to pass back
        // through the normalization, which only needs the log-probabilities it produced.
        let mut delta = match self.head {
            Head::Logits => d_output.clone(),
            Head::LogSoftmax => log_softmax_backward(&trace.output, d_output),
        };

        // Then walk the layers from last to first. Each layer adds xᵀ·delta and the column sums
        // of delta into its accumulators and hands back delta·Wᵀ, the gradient with respect to
        // its input. That input was the ReLU of the previous layer's weighted sums, so masking
        // by the ReLU derivative of those sums gives the previous layer's delta. The network
        // input itself needs no gradient, so the first layer's result is dropped.
        for index in (0..self.layers.len()).rev() {
            let d_input = self.layers[index].backward(&trace.layer_inputs[index], &delta);
            if index > 0 {
                delta = d_input * &trace.weighted_sums[index - 1].mapv(relu_derivative);
            }
        }

        Ok(())
    }

    pub fn gradients_are_finite(&self) -> bool {
        self.parameters().all(Parameter::grad_is_finite)
    }

    /// Class probabilities for every row of `input`.
    pub fn probabilities(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let scores = self.forward(input)?;
        Ok(match self.head {
            Head::Logits => softmax(&scores),
            Head::LogSoftmax => scores.mapv(f64::exp),
        })
    }

    /// The most likely class for every row of `input`.
    pub fn predict(&self, input: &Array2<f64>) -> Result<Array1<usize>> {
        let scores = self.forward(input)?;
        Ok(scores.rows().into_iter().map(|row| argmax(row.iter())).collect())
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint {
            sizes: self.sizes.clone(),
            head: self.head,
            weights: self.layers.iter().map(|l| l.weight.value.clone()).collect(),
            biases: self.layers.iter().map(|l| l.bias.value.clone()).collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &checkpoint)?;
        writer.flush()?;
        Ok(())
    }

    /// Restores a network written by [`Network::save_json`]. Gradient accumulators start cleared.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Network> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        Network::from_checkpoint(checkpoint)
    }

    fn from_checkpoint(checkpoint: Checkpoint) -> Result<Network> {
        let Checkpoint {
            sizes,
            head,
            weights,
            biases,
        } = checkpoint;
        check_sizes(&sizes)?;

        let num_layers = sizes.len() - 1;
        if weights.len() != num_layers || biases.len() != num_layers {
            return Err(Error::ShapeMismatch {
                what: "checkpoint layers",
                expected: vec![num_layers, num_layers],
                got: vec![weights.len(), biases.len()],
            });
        }

        let mut layers = Vec::with_capacity(num_layers);
        for ((weight, bias), dims) in weights.into_iter().zip(biases).zip(sizes.windows(2)) {
            if weight.dim() != (dims[0], dims[1]) {
                return Err(Error::ShapeMismatch {
                    what: "checkpoint weight",
                    expected: dims.to_vec(),
                    got: weight.shape().to_vec(),
                });
            }
            if bias.dim() != (1, dims[1]) {
                return Err(Error::ShapeMismatch {
                    what: "checkpoint bias",
                    expected: vec![1, dims[1]],
                    got: bias.shape().to_vec(),
                });
            }
            layers.push(Linear::from_parts(weight, bias));
        }

        Ok(Network {
            sizes,
            head,
            layers,
        })
    }

    fn check_input(&self, input: &Array2<f64>) -> Result<()> {
        if input.ncols() != self.input_dim() {
            return Err(Error::ShapeMismatch {
                what: "batch inputs",
                expected: vec![input.nrows(), self.input_dim()],
                got: input.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn apply_head(&self, scores: Array2<f64>) -> Array2<f64> {
        match self.head {
            Head::Logits => scores,
            Head::LogSoftmax => log_softmax(&scores),
        }
    }
}

fn check_sizes(sizes: &[usize]) -> Result<()> {
    if sizes.len() < 2 {
        return Err(Error::InvalidConfig(
            "layer sizes must include the input dimension and the number of classes".to_owned(),
        ));
    }
    if sizes.contains(&0) {
        return Err(Error::InvalidConfig("all layer sizes must be > 0".to_owned()));
    }
    Ok(())
}

pub(crate) fn argmax<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    values
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .unwrap_or(0)
}
