use ndarray::Zip;

use crate::{matrix::Matrix, optimizer::Optimizer};

/// Plain gradient descent, `W -= lr * dW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgd;

impl Sgd {
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for Sgd {
    type State = ();
    type LayerState = ();

    fn init_state(&self, _shape: (usize, usize)) -> Self::State {}

    fn init_layer_state(&self) -> Self::LayerState {}

    fn update(
        &self,
        parameter: &mut Matrix,
        gradient: &Matrix,
        _state: &mut Self::State,
        _layer: &Self::LayerState,
        learning_rate: f64,
    ) {
        Zip::from(parameter)
            .and(gradient)
            .for_each(|p, &g| *p -= learning_rate * g);
    }
}
