//! A small neural-network runtime whose layers form an arbitrary directed
//! acyclic graph.
//!
//! Layers are vertices of a [`graph::Graph`], connections are edges carrying a
//! weight matrix on the consuming layer. [`network::Mlp`] derives the forward
//! order and the reverse error flow from the topology, so a layer may feed and
//! be fed by any number of other layers.
//!
//! [`lstm::Lstm`] is a recurrent model trained with the same optimizers.

pub mod activation;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod layer;
pub mod loss;
pub mod lstm;
pub mod matrix;
pub mod network;
pub mod optimizer;
pub mod persistence;

pub use activation::{Activation, Linear, Relu, Sigmoid, Tanh};
pub use encoder::OneHotEncoder;
pub use error::{Error, Result};
pub use graph::Graph;
pub use layer::{Layer, LayerConfig, LayerKind, Source};
pub use loss::Loss;
pub use lstm::{CellState, Lstm};
pub use matrix::Matrix;
pub use network::{Inputs, Mlp};
pub use optimizer::{Adam, Frozen, Optimizer, RmsProp, Sgd};

/// Assert two arrays have the same shape and relatively equal elements.
/// Extra arguments such as `max_relative = 1e-6` are forwarded to
/// `assert_relative_eq!`.
#[macro_export]
macro_rules! assert_rel_eq_arr2 {
    ($actual:expr, $expected:expr) => {{
        let actual = &$actual;
        let expected = &$expected;
        assert_eq!(actual.shape(), expected.shape());
        ndarray::Zip::from(actual).and(expected).for_each(|v, w| {
            assert_relative_eq!(v, w);
        });
    }};
    ($actual:expr, $expected:expr, $($opt:tt)+) => {{
        let actual = &$actual;
        let expected = &$expected;
        assert_eq!(actual.shape(), expected.shape());
        ndarray::Zip::from(actual).and(expected).for_each(|v, w| {
            assert_relative_eq!(v, w, $($opt)+);
        });
    }};
}
