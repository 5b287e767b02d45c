use std::fmt::Debug;

use crate::matrix::Matrix;

/// Element-wise activation of a layer.
///
/// `derivative` receives the activation's own output `y = compute(x)`, not
/// `x`, so layers only cache their post-activation output.
pub trait Activation: Debug + Send + Sync {
    fn compute(&self, x: &Matrix) -> Matrix;

    fn derivative(&self, y: &Matrix) -> Matrix;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Sigmoid {
    fn compute_one(x: &f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }
}

impl Activation for Sigmoid {
    fn compute(&self, x: &Matrix) -> Matrix {
        x.map(Sigmoid::compute_one)
    }

    fn derivative(&self, y: &Matrix) -> Matrix {
        y.map(|&w| w * (1.0 - w))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Activation for Tanh {
    fn compute(&self, x: &Matrix) -> Matrix {
        x.map(|v| v.tanh())
    }

    fn derivative(&self, y: &Matrix) -> Matrix {
        y.map(|&w| 1.0 - w * w)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Activation for Relu {
    fn compute(&self, x: &Matrix) -> Matrix {
        x.map(|&v| if v > 0.0 { v } else { 0.0 })
    }

    fn derivative(&self, y: &Matrix) -> Matrix {
        y.map(|&v| if v > 0.0 { 1.0 } else { 0.0 })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl Activation for Linear {
    fn compute(&self, x: &Matrix) -> Matrix {
        x.clone()
    }

    fn derivative(&self, y: &Matrix) -> Matrix {
        y.map(|_| 1.0)
    }
}
