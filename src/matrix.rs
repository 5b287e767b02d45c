//! Dense matrix kernels the network is built on.
//!
//! Matrices are plain `ndarray` arrays; column vectors have shape `(n, 1)`.
//! The helpers here add shape checking on top of `ndarray`'s operators so that
//! a mismatch is reported as an [`Error::ShapeMismatch`] instead of a panic.

use ndarray::{Array, Array2, Zip};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::error::{Error, Result};

pub type Matrix = Array2<f64>;

/// Added to denominators to keep them away from zero.
pub const EPSILON: f64 = 1e-9;

/// Initial contents of a newly created matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Zero,
    Identity,
    /// Independent draws from U(-1, 1).
    Uniform,
}

pub fn filled<R: Rng + ?Sized>(rows: usize, cols: usize, fill: Fill, rng: &mut R) -> Matrix {
    match fill {
        Fill::Zero => Matrix::zeros((rows, cols)),
        Fill::Identity => Matrix::from_shape_fn((rows, cols), |(i, j)| if i == j { 1.0 } else { 0.0 }),
        Fill::Uniform => Array::random_using((rows, cols), Uniform::new(-1.0, 1.0), rng),
    }
}

pub fn ensure_shape(m: &Matrix, expected: (usize, usize)) -> Result<()> {
    if m.dim() != expected {
        return Err(Error::ShapeMismatch {
            expected,
            actual: m.dim(),
        });
    }
    Ok(())
}

pub fn add(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    ensure_shape(b, a.dim())?;
    Ok(a + b)
}

pub fn sub(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    ensure_shape(b, a.dim())?;
    Ok(a - b)
}

/// Element-wise product.
pub fn hadamard(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    ensure_shape(b, a.dim())?;
    Ok(a * b)
}

/// Matrix product, requires `a.ncols() == b.nrows()`.
pub fn dot(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    if a.ncols() != b.nrows() {
        return Err(Error::ShapeMismatch {
            expected: (a.ncols(), b.ncols()),
            actual: b.dim(),
        });
    }
    Ok(a.dot(b))
}

pub fn sum(m: &Matrix) -> f64 {
    m.sum()
}

pub fn max(m: &Matrix) -> f64 {
    m.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x))
}

pub fn min(m: &Matrix) -> f64 {
    m.fold(f64::INFINITY, |acc, &x| acc.min(x))
}

/// Max-shifted softmax over every element of `x`.
pub fn softmax(x: &Matrix) -> Matrix {
    let max_element = max(x);
    let exp_each = x.map(|v| (v - max_element).exp());
    let exp_sum = exp_each.sum();
    exp_each / (exp_sum + EPSILON)
}

/// `dst = dst * (1 - alpha) + src * alpha`, element-wise.
pub fn blend(dst: &mut Matrix, src: &Matrix, alpha: f64) -> Result<()> {
    ensure_shape(src, dst.dim())?;
    Zip::from(dst)
        .and(src)
        .for_each(|d, &s| *d = *d * (1.0 - alpha) + s * alpha);
    Ok(())
}
