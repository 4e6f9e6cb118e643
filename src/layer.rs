use ndarray::{Array, Array2, Axis};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};

/// A trainable array together with its gradient accumulator.
///
/// The accumulator always has the same shape as the value. Backward passes add into it; only
/// [`Parameter::zero_grad`] resets it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: Array2<f64>,
    pub grad: Array2<f64>,
}

impl Parameter {
    pub fn new(value: Array2<f64>) -> Parameter {
        Parameter {
            grad: Array::zeros(value.raw_dim()),
            value,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn grad_is_finite(&self) -> bool {
        self.grad.iter().all(|g| g.is_finite())
    }
}

/// An affine transform `x.W + b` over a batch of row vectors.
///
/// `weight` has shape `[in_dim x out_dim]` and `bias` has shape `[1 x out_dim]`, so that a
/// `[batch x in_dim]` input maps to a `[batch x out_dim]` output with the bias broadcast over rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub weight: Parameter,
    pub bias: Parameter,
}

impl Linear {
    // Weights are drawn uniformly from ±1/sqrt(in_dim) so the variance of each output stays
    // roughly independent of the layer width. Biases start at zero.
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Linear {
        let bound = 1.0 / (in_dim as f64).sqrt();
        Linear {
            weight: Parameter::new(Array::random_using(
                (in_dim, out_dim),
                Uniform::new(-bound, bound),
                rng,
            )),
            bias: Parameter::new(Array::zeros((1, out_dim))),
        }
    }

    pub fn from_parts(weight: Array2<f64>, bias: Array2<f64>) -> Linear {
        Linear {
            weight: Parameter::new(weight),
            bias: Parameter::new(bias),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.value.nrows()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.value.ncols()
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weight.value) + &self.bias.value
    }

    // Given the input this layer saw during the forward pass and the gradient of the loss with
    // respect to its output, adds this batch's contribution into the weight and bias
    // accumulators and returns the gradient with respect to the input.
    pub fn backward(&mut self, input: &Array2<f64>, d_output: &Array2<f64>) -> Array2<f64> {
        // Multiplying by the transposed input sums the outer products of every row pair in the
        // batch, and summing over rows does the same for the bias.
        self.weight.grad += &input.t().dot(d_output);
        self.bias.grad += &d_output.sum_axis(Axis(0)).insert_axis(Axis(0));

        d_output.dot(&self.weight.value.t())
    }
}
