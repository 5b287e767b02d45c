use ndarray::Zip;

use crate::{
    matrix::{Matrix, EPSILON},
    optimizer::Optimizer,
};

/// Adam with bias-corrected first and second moments.
#[derive(Debug, Clone, Copy)]
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Adam {
    pub fn new(beta1: f64, beta2: f64) -> Self {
        Self {
            beta1,
            beta2,
            ..Self::default()
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.99,
            epsilon: EPSILON,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdamMoments {
    pub first: Matrix,
    pub second: Matrix,
}

/// `beta1^t` and `beta2^t` for the layer's step count `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamPowers {
    pub beta1: f64,
    pub beta2: f64,
}

impl Optimizer for Adam {
    type State = AdamMoments;
    type LayerState = AdamPowers;

    fn init_state(&self, shape: (usize, usize)) -> Self::State {
        AdamMoments {
            first: Matrix::zeros(shape),
            second: Matrix::zeros(shape),
        }
    }

    fn init_layer_state(&self) -> Self::LayerState {
        AdamPowers {
            beta1: 1.0,
            beta2: 1.0,
        }
    }

    fn begin_layer(&self, layer: &mut Self::LayerState) {
        layer.beta1 *= self.beta1;
        layer.beta2 *= self.beta2;
    }

    fn update(
        &self,
        parameter: &mut Matrix,
        gradient: &Matrix,
        state: &mut Self::State,
        layer: &Self::LayerState,
        learning_rate: f64,
    ) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let first_correction = 1.0 - layer.beta1;
        let second_correction = 1.0 - layer.beta2;
        Zip::from(parameter)
            .and(gradient)
            .and(&mut state.first)
            .and(&mut state.second)
            .for_each(|p, &g, v, s| {
                *v = beta1 * *v + (1.0 - beta1) * g;
                *s = beta2 * *s + (1.0 - beta2) * g * g;
                let v_hat = *v / first_correction;
                let s_hat = *s / second_correction;
                *p -= v_hat / (s_hat.sqrt() + epsilon) * learning_rate;
            });
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_rel_eq_arr2;

    use super::*;

    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn powers_decay_per_step() {
        let opt = Adam::default();
        let mut powers = opt.init_layer_state();
        opt.begin_layer(&mut powers);
        opt.begin_layer(&mut powers);
        assert_relative_eq!(powers.beta1, 0.81, max_relative = 1e-12);
        assert_relative_eq!(powers.beta2, 0.9801, max_relative = 1e-12);
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction the first step is lr * g / |g| for every element.
        let opt = Adam::default();
        let mut w = arr2(&[[1.0, 1.0, 1.0]]);
        let dw = arr2(&[[0.5, -3.0, 0.01]]);
        let mut moments = opt.init_state((1, 3));
        let mut powers = opt.init_layer_state();

        opt.begin_layer(&mut powers);
        opt.update(&mut w, &dw, &mut moments, &powers, 0.01);

        assert_rel_eq_arr2!(w, arr2(&[[0.99, 1.01, 0.99]]), max_relative = 1e-6);
        assert_rel_eq_arr2!(moments.first, &dw * 0.1, max_relative = 1e-12);
        assert_rel_eq_arr2!(moments.second, dw.map(|g| g * g * 0.01), max_relative = 1e-12);
    }
}
