//! Parameter-update strategies.
//!
//! A network is generic over one [`Optimizer`]; every layer of it carries that
//! optimizer's state next to each parameter matrix, so the update rule is fixed
//! when the network is built and never branched on per step.

mod adam;
mod frozen;
mod rmsprop;
mod sgd;

use std::fmt::Debug;

use crate::matrix::Matrix;

pub use adam::{Adam, AdamMoments, AdamPowers};
pub use frozen::Frozen;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;

/// Trait to abstract parameter-update rules.
pub trait Optimizer: Debug + Clone {
    /// State kept beside each weight matrix and bias.
    type State: Debug + Clone;
    /// State shared by all parameters of one layer.
    type LayerState: Debug + Clone;

    /// Whether layers keep gradient buffers. A network whose optimizer
    /// returns false can only run inference.
    fn trainable(&self) -> bool {
        true
    }

    fn init_state(&self, shape: (usize, usize)) -> Self::State;

    fn init_layer_state(&self) -> Self::LayerState;

    /// Called once per layer and step, before any of its parameters update.
    fn begin_layer(&self, _layer: &mut Self::LayerState) {}

    /// Apply one step to `parameter` from the accumulated `gradient`.
    fn update(
        &self,
        parameter: &mut Matrix,
        gradient: &Matrix,
        state: &mut Self::State,
        layer: &Self::LayerState,
        learning_rate: f64,
    );
}
