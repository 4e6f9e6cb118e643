use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, seq::SliceRandom};

use crate::error::{Error, Result};

/// Labelled images stored one per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    images: Array2<f64>,
    labels: Array1<usize>,
}

/// One training step's worth of examples. Consumed by the step that receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<f64>,
    pub labels: Array1<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Dataset {
    pub fn new(images: Array2<f64>, labels: Array1<usize>) -> Result<Dataset> {
        if images.nrows() != labels.len() {
            return Err(Error::ShapeMismatch {
                what: "dataset labels",
                expected: vec![images.nrows()],
                got: vec![labels.len()],
            });
        }
        Ok(Dataset { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn input_dim(&self) -> usize {
        self.images.ncols()
    }

    pub fn images(&self) -> &Array2<f64> {
        &self.images
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// Splits off the examples from `at` onwards into a new dataset, keeping the first `at`.
    pub fn split_off(&mut self, at: usize) -> Result<Dataset> {
        if at > self.len() {
            return Err(Error::InvalidConfig(format!(
                "cannot split {} examples at {at}",
                self.len()
            )));
        }
        let (head_images, tail_images) = self.images.view().split_at(Axis(0), at);
        let (head_labels, tail_labels) = self.labels.view().split_at(Axis(0), at);
        let tail = Dataset {
            images: tail_images.to_owned(),
            labels: tail_labels.to_owned(),
        };
        let head = Dataset {
            images: head_images.to_owned(),
            labels: head_labels.to_owned(),
        };
        *self = head;
        Ok(tail)
    }

    /// Batches over a fresh random permutation of the examples. The last batch is shorter when
    /// `batch_size` doesn't divide the dataset.
    pub fn batches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        Batches::new(self, order, batch_size)
    }

    /// Batches in storage order, for evaluation.
    pub fn batches_in_order(&self, batch_size: usize) -> Batches<'_> {
        Batches::new(self, (0..self.len()).collect(), batch_size)
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

/// Iterator over the batches of one epoch.
pub struct Batches<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl<'a> Batches<'a> {
    fn new(dataset: &'a Dataset, order: Vec<usize>, batch_size: usize) -> Batches<'a> {
        // A zero batch size would never advance.
        let batch_size = batch_size.max(1);
        Batches {
            dataset,
            order,
            batch_size,
            position: 0,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let batch = self.dataset.gather(&self.order[self.position..end]);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}
