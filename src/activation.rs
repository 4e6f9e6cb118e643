use ndarray::{Array2, Axis};

pub fn relu(z: f64) -> f64 {
    z.max(0.0)
}

// The derivative at exactly 0 is taken to be 0, matching the usual subgradient choice.
pub fn relu_derivative(z: f64) -> f64 {
    if z > 0.0 { 1.0 } else { 0.0 }
}

// Row-wise normalized exponential. Each row of scores is shifted by its maximum before
// exponentiating, so large scores can't overflow to infinity.
pub fn softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = scores.clone();
    for mut row in probabilities.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, &z| acc.max(z));
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|e| e / sum);
    }
    probabilities
}

// Row-wise log of the normalized exponential, computed as z - max - ln(Σ exp(z - max)) so that
// probabilities close to 0 never have to be represented before taking the logarithm.
pub fn log_softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut log_probabilities = scores.clone();
    for mut row in log_probabilities.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, &z| acc.max(z));
        let log_sum_exp = row.iter().map(|&z| (z - max).exp()).sum::<f64>().ln() + max;
        row.mapv_inplace(|z| z - log_sum_exp);
    }
    log_probabilities
}

// Backpropagates through log_softmax. Given the log-probabilities it produced and the gradient
// of the loss with respect to them, returns the gradient with respect to its input scores:
// dz = dy - softmax(z) * Σ dy (summed per row).
pub fn log_softmax_backward(log_probabilities: &Array2<f64>, d_output: &Array2<f64>) -> Array2<f64> {
    let row_sums = d_output.sum_axis(Axis(1)).insert_axis(Axis(1));
    d_output - &(log_probabilities.mapv(f64::exp) * &row_sums)
}
