use crate::{matrix::Matrix, optimizer::Optimizer};

/// Binding for inference-only networks: no gradient buffers, no updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frozen;

impl Optimizer for Frozen {
    type State = ();
    type LayerState = ();

    fn trainable(&self) -> bool {
        false
    }

    fn init_state(&self, _shape: (usize, usize)) -> Self::State {}

    fn init_layer_state(&self) -> Self::LayerState {}

    fn update(
        &self,
        _parameter: &mut Matrix,
        _gradient: &Matrix,
        _state: &mut Self::State,
        _layer: &Self::LayerState,
        _learning_rate: f64,
    ) {
    }
}
