//! Loss policies for integer-labelled classification.
//!
//! Both policies report the mean over the batch and come paired with the gradient of that mean
//! with respect to the scores they were given, ready to be fed to `Network::backward`.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::activation::{log_softmax, softmax};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Softmax followed by the negative log of the true-class probability, on raw scores.
    CrossEntropy,
    /// Negative log of the true-class probability, on scores that are already log-probabilities.
    NegativeLogLikelihood,
}

impl Loss {
    pub fn evaluate(self, scores: &Array2<f64>, labels: &Array1<usize>) -> Result<f64> {
        match self {
            Loss::CrossEntropy => cross_entropy(scores, labels),
            Loss::NegativeLogLikelihood => nll(scores, labels),
        }
    }

    /// Returns the mean loss together with its gradient with respect to `scores`.
    pub fn evaluate_with_grad(
        self,
        scores: &Array2<f64>,
        labels: &Array1<usize>,
    ) -> Result<(f64, Array2<f64>)> {
        match self {
            Loss::CrossEntropy => cross_entropy_with_grad(scores, labels),
            Loss::NegativeLogLikelihood => nll_with_grad(scores, labels),
        }
    }
}

// Taking the log of softmax would underflow to ln(0) once the true class trails the best score
// by a few hundred, so the per-row term comes straight from the max-shifted log-softmax.
pub fn cross_entropy(logits: &Array2<f64>, labels: &Array1<usize>) -> Result<f64> {
    check_labels(logits, labels)?;
    let log_probabilities = log_softmax(logits);
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| -log_probabilities[[row, label]])
        .sum();
    finite_mean(total, labels.len())
}

// The gradient of the mean cross-entropy with respect to the logits is (softmax - one_hot) / N.
pub fn cross_entropy_with_grad(
    logits: &Array2<f64>,
    labels: &Array1<usize>,
) -> Result<(f64, Array2<f64>)> {
    let loss = cross_entropy(logits, labels)?;
    let scale = 1.0 / labels.len() as f64;
    let mut grad = softmax(logits);
    for (row, &label) in labels.iter().enumerate() {
        grad[[row, label]] -= 1.0;
    }
    grad.mapv_inplace(|g| g * scale);
    Ok((loss, grad))
}

pub fn nll(log_probabilities: &Array2<f64>, labels: &Array1<usize>) -> Result<f64> {
    check_labels(log_probabilities, labels)?;
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| -log_probabilities[[row, label]])
        .sum();
    finite_mean(total, labels.len())
}

// Only the true-class entry of each row contributes, with gradient -1 / N.
pub fn nll_with_grad(
    log_probabilities: &Array2<f64>,
    labels: &Array1<usize>,
) -> Result<(f64, Array2<f64>)> {
    let loss = nll(log_probabilities, labels)?;
    let scale = 1.0 / labels.len() as f64;
    let mut grad = Array2::zeros(log_probabilities.raw_dim());
    for (row, &label) in labels.iter().enumerate() {
        grad[[row, label]] = -scale;
    }
    Ok((loss, grad))
}

fn check_labels(scores: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
    if scores.nrows() != labels.len() {
        return Err(Error::ShapeMismatch {
            what: "labels",
            expected: vec![scores.nrows()],
            got: vec![labels.len()],
        });
    }
    if labels.is_empty() {
        return Err(Error::ShapeMismatch {
            what: "labels",
            expected: vec![1],
            got: vec![0],
        });
    }

    let num_classes = scores.ncols();
    match labels.iter().position(|&label| label >= num_classes) {
        Some(row) => Err(Error::LabelOutOfRange {
            row,
            label: labels[row],
            num_classes,
        }),
        None => Ok(()),
    }
}

fn finite_mean(total: f64, count: usize) -> Result<f64> {
    let mean = total / count as f64;
    if mean.is_finite() {
        Ok(mean)
    } else {
        Err(Error::NonFinite { what: "loss" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn both_policies_agree() {
        let logits = array![
            [2.0, 1.0, 0.1, -3.0],
            [0.0, 0.0, 0.0, 0.0],
            [-1.5, 7.0, 2.2, 0.3],
        ];
        let labels = array![0, 3, 2];

        let from_logits = cross_entropy(&logits, &labels).unwrap();
        let from_log_probabilities = nll(&log_softmax(&logits), &labels).unwrap();
        assert_abs_diff_eq!(from_logits, from_log_probabilities, epsilon = 1e-10);
    }

    #[test]
    fn policies_agree_when_the_true_class_is_far_behind() {
        let logits = array![[800.0, 0.0], [0.0, 0.0]];
        let labels = array![1, 0];

        let from_logits = cross_entropy(&logits, &labels).unwrap();
        let from_log_probabilities = nll(&log_softmax(&logits), &labels).unwrap();
        assert_abs_diff_eq!(from_logits, (800.0 + 2f64.ln()) / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(from_logits, from_log_probabilities, epsilon = 1e-9);

        let (value, grad) = cross_entropy_with_grad(&logits, &labels).unwrap();
        assert_abs_diff_eq!(value, from_logits, epsilon = 1e-12);
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn uniform_scores_cost_ln_classes() {
        let logits = Array2::zeros((5, 10));
        let labels = array![0, 1, 2, 3, 9];
        assert_abs_diff_eq!(
            cross_entropy(&logits, &labels).unwrap(),
            10f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn gradients_agree_after_log_softmax_backward() {
        let logits = array![[0.5, -0.25, 1.5], [3.0, 0.0, -1.0]];
        let labels = array![2, 1];

        let (_, d_logits) = cross_entropy_with_grad(&logits, &labels).unwrap();

        let log_probabilities = log_softmax(&logits);
        let (_, d_log_probabilities) = nll_with_grad(&log_probabilities, &labels).unwrap();
        let chained =
            crate::activation::log_softmax_backward(&log_probabilities, &d_log_probabilities);

        assert_abs_diff_eq!(d_logits, chained, epsilon = 1e-12);
    }

    #[test]
    fn cross_entropy_grad_matches_finite_differences() {
        let logits = array![[0.2, -0.4, 1.1], [0.0, 2.0, -2.0]];
        let labels = array![1, 0];
        let (_, analytic) = cross_entropy_with_grad(&logits, &labels).unwrap();

        let eps = 1e-6;
        for ((row, col), &a) in analytic.indexed_iter() {
            let mut plus = logits.clone();
            plus[[row, col]] += eps;
            let mut minus = logits.clone();
            minus[[row, col]] -= eps;
            let numeric = (cross_entropy(&plus, &labels).unwrap()
                - cross_entropy(&minus, &labels).unwrap())
                / (2.0 * eps);
            assert_abs_diff_eq!(a, numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let logits = Array2::zeros((3, 10));
        let labels = array![1, 10, 4];
        match Loss::CrossEntropy.evaluate(&logits, &labels) {
            Err(Error::LabelOutOfRange {
                row,
                label,
                num_classes,
            }) => assert_eq!((row, label, num_classes), (1, 10, 10)),
            other => panic!("expected LabelOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let logits = Array2::zeros((3, 10));
        let labels = array![1, 2];
        assert!(matches!(
            Loss::NegativeLogLikelihood.evaluate(&logits, &labels),
            Err(Error::ShapeMismatch { what: "labels", .. })
        ));
    }

    #[test]
    fn non_finite_scores_are_reported() {
        let logits = array![[f64::NAN, 0.0], [1.0, 0.0]];
        let labels = array![0, 1];
        assert!(matches!(
            cross_entropy_with_grad(&logits, &labels),
            Err(Error::NonFinite { what: "loss" })
        ));

        let log_probabilities = array![[f64::NEG_INFINITY, 0.0]];
        assert!(matches!(
            nll(&log_probabilities, &array![0]),
            Err(Error::NonFinite { what: "loss" })
        ));
    }
}
