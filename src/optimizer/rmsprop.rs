use ndarray::Zip;

use crate::{
    matrix::{Matrix, EPSILON},
    optimizer::Optimizer,
};

/// RMSProp: scales each step by a running average of squared gradients.
#[derive(Debug, Clone, Copy)]
pub struct RmsProp {
    pub rho: f64,
    pub epsilon: f64,
}

impl RmsProp {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            ..Self::default()
        }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        Self {
            rho: 0.9,
            epsilon: EPSILON,
        }
    }
}

impl Optimizer for RmsProp {
    /// Running average of the squared gradient.
    type State = Matrix;
    type LayerState = ();

    fn init_state(&self, shape: (usize, usize)) -> Self::State {
        Matrix::zeros(shape)
    }

    fn init_layer_state(&self) -> Self::LayerState {}

    fn update(
        &self,
        parameter: &mut Matrix,
        gradient: &Matrix,
        state: &mut Self::State,
        _layer: &Self::LayerState,
        learning_rate: f64,
    ) {
        let (rho, epsilon) = (self.rho, self.epsilon);
        Zip::from(parameter)
            .and(gradient)
            .and(state)
            .for_each(|p, &g, s| {
                *s = rho * *s + (1.0 - rho) * g * g;
                *p -= g / (s.sqrt() + epsilon) * learning_rate;
            });
    }
}
