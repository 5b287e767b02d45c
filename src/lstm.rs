//! Single-layer LSTM over sequences of column vectors.
//!
//! Each step reads `x(t)` and the previous hidden and cell state:
//!
//! ```text
//! i = sigmoid(Wi x + Ui h + Bi)      f = sigmoid(Wf x + Uf h + Bf)
//! g = tanh(Wg x + Ug h + Bg)         o = sigmoid(Wo x + Uo h + Bo)
//! c' = f * c + i * g                 h' = o * tanh(c')
//! y = sigmoid(Wp h' + Bp)
//! ```
//!
//! Training follows the network's cycle: `forward` over a whole sequence,
//! `gradient` backpropagates through every step of it, `optimize` applies the
//! accumulated gradients with the bound [`Optimizer`].

use log::{debug, warn};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use crate::activation::{Activation, Sigmoid, Tanh};
use crate::error::{Error, Result};
use crate::layer::Accumulator;
use crate::loss::Loss;
use crate::matrix::{self, Fill, Matrix};
use crate::optimizer::Optimizer;

#[derive(Debug, Clone)]
struct Parameter<S> {
    value: Matrix,
    acc: Accumulator<S>,
}

impl<S> Parameter<S> {
    fn new<O: Optimizer<State = S>>(shape: (usize, usize), optimizer: &O, rng: &mut StdRng) -> Self {
        Self {
            value: matrix::filled(shape.0, shape.1, Fill::Uniform, rng),
            acc: Accumulator::new(optimizer, shape),
        }
    }
}

/// `W` on the step input, `U` on the previous hidden state, bias `B`.
#[derive(Debug, Clone)]
struct Gate<S> {
    w: Parameter<S>,
    u: Parameter<S>,
    b: Parameter<S>,
}

impl<S> Gate<S> {
    fn new<O: Optimizer<State = S>>(
        input_dim: usize,
        hidden_dim: usize,
        optimizer: &O,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            w: Parameter::new((hidden_dim, input_dim), optimizer, rng),
            u: Parameter::new((hidden_dim, hidden_dim), optimizer, rng),
            b: Parameter::new((hidden_dim, 1), optimizer, rng),
        }
    }

    fn pre_activation(&self, x: &Matrix, hidden: &Matrix) -> Matrix {
        self.w.value.dot(x) + self.u.value.dot(hidden) + &self.b.value
    }

    /// `delta` is the gradient of the loss with respect to the pre-activation.
    fn accumulate(&mut self, delta: &Matrix, x: &Matrix, hidden: &Matrix) {
        self.w.acc.gradient += &delta.dot(&x.t());
        self.u.acc.gradient += &delta.dot(&hidden.t());
        self.b.acc.gradient += delta;
    }
}

/// Activations of one step, all `(hidden_dim, 1)` except `prediction`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub input: Matrix,
    pub forget: Matrix,
    pub candidate: Matrix,
    pub output: Matrix,
    pub cell: Matrix,
    pub hidden: Matrix,
    /// `(output_dim, 1)`.
    pub prediction: Matrix,
}

impl CellState {
    fn zeros(hidden_dim: usize, output_dim: usize) -> Self {
        let zeros = Matrix::zeros((hidden_dim, 1));
        Self {
            input: zeros.clone(),
            forget: zeros.clone(),
            candidate: zeros.clone(),
            output: zeros.clone(),
            cell: zeros.clone(),
            hidden: zeros,
            prediction: Matrix::zeros((output_dim, 1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lstm<O: Optimizer> {
    input_dim: usize,
    hidden_dim: usize,
    output_dim: usize,
    optimizer: O,
    input_gate: Gate<O::State>,
    forget_gate: Gate<O::State>,
    candidate_gate: Gate<O::State>,
    output_gate: Gate<O::State>,
    predict_w: Parameter<O::State>,
    predict_b: Parameter<O::State>,
    layer_state: O::LayerState,
    // The zero initial state followed by one state per step of the last
    // `forward` call.
    states: Vec<CellState>,
    pending: usize,
}

impl<O: Optimizer> Lstm<O> {
    /// LSTM whose parameters are drawn from an entropy-seeded generator.
    pub fn new(optimizer: O, input_dim: usize, hidden_dim: usize, output_dim: usize) -> Result<Self> {
        Self::with_rng(
            optimizer,
            (input_dim, hidden_dim, output_dim),
            StdRng::from_entropy(),
        )
    }

    pub fn with_seed(
        optimizer: O,
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(
            optimizer,
            (input_dim, hidden_dim, output_dim),
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        optimizer: O,
        (input_dim, hidden_dim, output_dim): (usize, usize, usize),
        mut rng: StdRng,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_dim == 0 || output_dim == 0 {
            return Err(Error::ZeroWidth {
                name: "lstm".to_owned(),
            });
        }
        let rng = &mut rng;
        Ok(Self {
            input_dim,
            hidden_dim,
            output_dim,
            input_gate: Gate::new(input_dim, hidden_dim, &optimizer, rng),
            forget_gate: Gate::new(input_dim, hidden_dim, &optimizer, rng),
            candidate_gate: Gate::new(input_dim, hidden_dim, &optimizer, rng),
            output_gate: Gate::new(input_dim, hidden_dim, &optimizer, rng),
            predict_w: Parameter::new((output_dim, hidden_dim), &optimizer, rng),
            predict_b: Parameter::new((output_dim, 1), &optimizer, rng),
            layer_state: optimizer.init_layer_state(),
            optimizer,
            states: vec![CellState::zeros(hidden_dim, output_dim)],
            pending: 0,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Zero initial state, then the state after each step of the last
    /// [`Lstm::forward`].
    pub fn states(&self) -> &[CellState] {
        &self.states
    }

    pub fn pending_gradients(&self) -> usize {
        self.pending
    }

    fn step(&self, x: &Matrix, previous: &CellState) -> CellState {
        let hidden = &previous.hidden;
        let input = Sigmoid.compute(&self.input_gate.pre_activation(x, hidden));
        let forget = Sigmoid.compute(&self.forget_gate.pre_activation(x, hidden));
        let candidate = Tanh.compute(&self.candidate_gate.pre_activation(x, hidden));
        let output = Sigmoid.compute(&self.output_gate.pre_activation(x, hidden));
        let cell = &forget * &previous.cell + &input * &candidate;
        let hidden = &output * &Tanh.compute(&cell);
        let prediction =
            Sigmoid.compute(&(self.predict_w.value.dot(&hidden) + &self.predict_b.value));
        CellState {
            input,
            forget,
            candidate,
            output,
            cell,
            hidden,
            prediction,
        }
    }

    /// Run `sequence` from a zero state and return the prediction of every step.
    pub fn forward(&mut self, sequence: &[Matrix]) -> Result<Vec<Matrix>> {
        for x in sequence {
            matrix::ensure_shape(x, (self.input_dim, 1))?;
        }
        let mut states = Vec::with_capacity(sequence.len() + 1);
        states.push(CellState::zeros(self.hidden_dim, self.output_dim));
        for x in sequence {
            let next = match states.last() {
                Some(previous) => self.step(x, previous),
                None => continue,
            };
            states.push(next);
        }
        self.states = states;
        Ok(self.states[1..]
            .iter()
            .map(|state| state.prediction.clone())
            .collect())
    }

    fn check_sequences(&self, sequence: &[Matrix], targets: &[Matrix]) -> Result<()> {
        let steps = self.states.len() - 1;
        for len in [sequence.len(), targets.len()] {
            if len != steps {
                return Err(Error::SequenceMismatch {
                    expected: steps,
                    actual: len,
                });
            }
        }
        for x in sequence {
            matrix::ensure_shape(x, (self.input_dim, 1))?;
        }
        for target in targets {
            matrix::ensure_shape(target, (self.output_dim, 1))?;
        }
        Ok(())
    }

    /// Backpropagate through every step of the last forward pass against
    /// `targets`, minimising `0.5 * |y(t) - target(t)|^2` summed over steps.
    /// Gradients accumulate until [`Lstm::optimize`].
    pub fn gradient(&mut self, sequence: &[Matrix], targets: &[Matrix]) -> Result<()> {
        if !self.optimizer.trainable() {
            return Err(Error::Frozen);
        }
        self.check_sequences(sequence, targets)?;
        if sequence.is_empty() {
            return Ok(());
        }

        let states = std::mem::take(&mut self.states);
        // Gradients flowing into step t - 1 from step t.
        let mut hidden_next = Matrix::zeros((self.hidden_dim, 1));
        let mut cell_next = Matrix::zeros((self.hidden_dim, 1));
        for t in (1..states.len()).rev() {
            let (previous, current) = (&states[t - 1], &states[t]);
            let x = &sequence[t - 1];

            let d_prediction = (&current.prediction - &targets[t - 1])
                * Sigmoid.derivative(&current.prediction);
            self.predict_w.acc.gradient += &d_prediction.dot(&current.hidden.t());
            self.predict_b.acc.gradient += &d_prediction;

            let d_hidden = self.predict_w.value.t().dot(&d_prediction) + &hidden_next;
            let tanh_cell = Tanh.compute(&current.cell);
            let d_cell = &d_hidden * &current.output * Tanh.derivative(&tanh_cell) + &cell_next;

            let d_input = &d_cell * &current.candidate * Sigmoid.derivative(&current.input);
            let d_forget = &d_cell * &previous.cell * Sigmoid.derivative(&current.forget);
            let d_candidate = &d_cell * &current.input * Tanh.derivative(&current.candidate);
            let d_output = &d_hidden * &tanh_cell * Sigmoid.derivative(&current.output);

            hidden_next = self.input_gate.u.value.t().dot(&d_input)
                + self.forget_gate.u.value.t().dot(&d_forget)
                + self.candidate_gate.u.value.t().dot(&d_candidate)
                + self.output_gate.u.value.t().dot(&d_output);
            cell_next = &d_cell * &current.forget;

            self.input_gate.accumulate(&d_input, x, &previous.hidden);
            self.forget_gate.accumulate(&d_forget, x, &previous.hidden);
            self.candidate_gate.accumulate(&d_candidate, x, &previous.hidden);
            self.output_gate.accumulate(&d_output, x, &previous.hidden);
        }
        self.states = states;
        self.pending += 1;
        Ok(())
    }

    /// Apply the accumulated gradients and zero them. Does nothing if no
    /// gradient is pending.
    pub fn optimize(&mut self, learning_rate: f64) {
        if !self.optimizer.trainable() {
            return;
        }
        if self.pending == 0 {
            warn!("optimize called without accumulated gradients");
            return;
        }
        debug!(
            "lstm optimize: {} accumulated sequence(s), learning rate {}",
            self.pending, learning_rate
        );

        let Self {
            optimizer,
            layer_state,
            input_gate,
            forget_gate,
            candidate_gate,
            output_gate,
            predict_w,
            predict_b,
            ..
        } = self;
        optimizer.begin_layer(layer_state);
        for gate in [input_gate, forget_gate, candidate_gate, output_gate] {
            for parameter in [&mut gate.w, &mut gate.u, &mut gate.b] {
                apply(optimizer, parameter, layer_state, learning_rate);
            }
        }
        apply(optimizer, predict_w, layer_state, learning_rate);
        apply(optimizer, predict_b, layer_state, learning_rate);
        self.pending = 0;
    }

    /// Mean squared error per step of the last forward pass, averaged over
    /// the sequence.
    pub fn loss(&self, targets: &[Matrix]) -> Result<f64> {
        let steps = self.states.len() - 1;
        if targets.len() != steps {
            return Err(Error::SequenceMismatch {
                expected: steps,
                actual: targets.len(),
            });
        }
        if steps == 0 {
            return Ok(0.0);
        }
        let total = self.states[1..]
            .iter()
            .zip(targets)
            .map(|(state, target)| Loss::MeanSquaredError.value(&state.prediction, target))
            .sum::<Result<f64>>()?;
        Ok(total / steps as f64)
    }
}

fn apply<O: Optimizer>(
    optimizer: &O,
    parameter: &mut Parameter<O::State>,
    layer_state: &O::LayerState,
    learning_rate: f64,
) {
    optimizer.update(
        &mut parameter.value,
        &parameter.acc.gradient,
        &mut parameter.acc.state,
        layer_state,
        learning_rate,
    );
    parameter.acc.gradient.fill(0.0);
}

#[cfg(test)]
mod tests {
    use crate::optimizer::{Adam, Frozen, Sgd};

    use super::*;

    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn sequence() -> (Vec<Matrix>, Vec<Matrix>) {
        let xs = vec![
            arr2(&[[0.5], [-0.2]]),
            arr2(&[[0.1], [0.8]]),
            arr2(&[[-0.7], [0.3]]),
        ];
        let ys = vec![arr2(&[[0.2]]), arr2(&[[0.9]]), arr2(&[[0.4]])];
        (xs, ys)
    }

    fn half_loss(lstm: &mut Lstm<Sgd>, xs: &[Matrix], ys: &[Matrix]) -> f64 {
        lstm.forward(xs)
            .unwrap()
            .iter()
            .zip(ys)
            .map(|(y, t)| 0.5 * (y - t).mapv(|d| d * d).sum())
            .sum()
    }

    #[test]
    fn forward_keeps_one_state_per_step() {
        let mut lstm = Lstm::with_seed(Sgd, 2, 3, 1, 0).unwrap();
        let (xs, _) = sequence();
        let predictions = lstm.forward(&xs).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(lstm.states().len(), 4);
        assert_eq!(lstm.states()[0], CellState::zeros(3, 1));
        for (state, y) in lstm.states()[1..].iter().zip(&predictions) {
            assert_eq!(state.hidden.dim(), (3, 1));
            assert_eq!(&state.prediction, y);
            assert!(y[[0, 0]] > 0.0 && y[[0, 0]] < 1.0);
        }

        // Every forward starts again from a zero state.
        assert_eq!(lstm.forward(&xs).unwrap(), predictions);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(
            Lstm::with_seed(Sgd, 2, 0, 1, 0),
            Err(Error::ZeroWidth { .. })
        ));
        let mut lstm = Lstm::with_seed(Sgd, 2, 3, 1, 0).unwrap();
        assert!(matches!(
            lstm.forward(&[arr2(&[[1.0]])]),
            Err(Error::ShapeMismatch { .. })
        ));
        let (xs, ys) = sequence();
        lstm.forward(&xs).unwrap();
        assert!(matches!(
            lstm.gradient(&xs, &ys[..2]),
            Err(Error::SequenceMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            lstm.gradient(&xs[..1], &ys[..1]),
            Err(Error::SequenceMismatch { .. })
        ));
        assert_eq!(lstm.pending_gradients(), 0);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (xs, ys) = sequence();
        let mut lstm = Lstm::with_seed(Sgd, 2, 3, 1, 17).unwrap();
        lstm.forward(&xs).unwrap();
        lstm.gradient(&xs, &ys).unwrap();

        let selectors: [fn(&mut Lstm<Sgd>) -> &mut Parameter<()>; 7] = [
            |l| &mut l.input_gate.w,
            |l| &mut l.forget_gate.u,
            |l| &mut l.forget_gate.b,
            |l| &mut l.candidate_gate.u,
            |l| &mut l.output_gate.w,
            |l| &mut l.predict_w,
            |l| &mut l.predict_b,
        ];
        let h = 1e-6;
        for select in selectors {
            let analytic = select(&mut lstm).acc.gradient.clone();
            for ((i, j), &g) in analytic.indexed_iter() {
                let mut nudged = lstm.clone();
                select(&mut nudged).value[[i, j]] += h;
                let plus = half_loss(&mut nudged, &xs, &ys);
                select(&mut nudged).value[[i, j]] -= 2.0 * h;
                let minus = half_loss(&mut nudged, &xs, &ys);
                let numeric = (plus - minus) / (2.0 * h);
                assert_relative_eq!(g, numeric, epsilon = 1e-7, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn gradients_accumulate_and_optimize_once() {
        let (xs, ys) = sequence();
        let mut lstm = Lstm::with_seed(Sgd, 2, 3, 1, 4).unwrap();
        lstm.forward(&xs).unwrap();
        lstm.gradient(&xs, &ys).unwrap();
        let once = lstm.predict_w.acc.gradient.clone();
        lstm.gradient(&xs, &ys).unwrap();
        assert_eq!(lstm.pending_gradients(), 2);
        assert_relative_eq!(lstm.predict_w.acc.gradient.sum(), once.sum() * 2.0);

        let before = lstm.predict_b.value.clone();
        let step = lstm.predict_b.acc.gradient.clone() * 0.1;
        lstm.optimize(0.1);
        assert_eq!(lstm.predict_b.value, &before - &step);
        assert!(lstm.input_gate.w.acc.gradient.iter().all(|&g| g == 0.0));

        let after = lstm.clone();
        lstm.optimize(0.1);
        assert_eq!(lstm.predict_b.value, after.predict_b.value);
        assert_eq!(lstm.forget_gate.u.value, after.forget_gate.u.value);
    }

    #[test]
    fn frozen_lstm_only_runs_forward() {
        let (xs, ys) = sequence();
        let mut lstm = Lstm::with_seed(Frozen, 2, 3, 1, 0).unwrap();
        assert_eq!(lstm.forward(&xs).unwrap().len(), 3);
        assert!(matches!(lstm.gradient(&xs, &ys), Err(Error::Frozen)));
    }

    #[test]
    fn training_reduces_loss() {
        let (xs, ys) = sequence();
        let mut lstm = Lstm::with_seed(Adam::default(), 2, 4, 1, 8).unwrap();
        lstm.forward(&xs).unwrap();
        let initial = lstm.loss(&ys).unwrap();
        for _ in 0..300 {
            lstm.forward(&xs).unwrap();
            lstm.gradient(&xs, &ys).unwrap();
            lstm.optimize(0.01);
        }
        lstm.forward(&xs).unwrap();
        assert!(lstm.loss(&ys).unwrap() < initial);
    }
}
