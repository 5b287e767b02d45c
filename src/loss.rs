use crate::error::Result;
use crate::matrix::{self, Matrix, EPSILON};

/// Loss attached to an output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    #[default]
    MeanSquaredError,
    /// Softmax outputs scored against a one-hot or probability target.
    CrossEntropy,
}

impl Loss {
    /// Error seeded into an output layer's accumulator.
    ///
    /// For mean squared error this is `output - target`, the derivative of
    /// `0.5 * |output - target|^2`. For cross-entropy it is the per-element
    /// loss `-target * ln(output)`.
    pub fn error(&self, output: &Matrix, target: &Matrix) -> Result<Matrix> {
        match self {
            Loss::MeanSquaredError => matrix::sub(output, target),
            Loss::CrossEntropy => {
                let log_output = output.map(|o| (o + EPSILON).ln());
                Ok(-matrix::hadamard(target, &log_output)?)
            }
        }
    }

    /// Scalar loss of one sample.
    pub fn value(&self, output: &Matrix, target: &Matrix) -> Result<f64> {
        match self {
            Loss::MeanSquaredError => {
                let diff = matrix::sub(output, target)?;
                Ok(diff.map(|d| d * d).sum() / diff.len() as f64)
            }
            Loss::CrossEntropy => Ok(matrix::sum(&self.error(output, target)?)),
        }
    }
}
