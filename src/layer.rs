use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray_rand::rand::Rng;

use crate::activation::{Activation, Sigmoid};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::matrix::{self, Fill, Matrix};
use crate::optimizer::Optimizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Reads an external input instead of other layers.
    Input,
    Hidden,
    /// Compared against the target in the backward pass.
    Output,
}

/// Where a weight matrix takes its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    /// The external input of an input layer.
    External,
    /// The output of the layer at this vertex index.
    Layer(usize),
}

/// Shape and behaviour of a layer before it is added to a network.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    kind: LayerKind,
    dim: usize,
    input_dim: usize,
    activation: Arc<dyn Activation>,
    loss: Loss,
}

impl LayerConfig {
    fn new(kind: LayerKind, dim: usize, input_dim: usize) -> Self {
        Self {
            kind,
            dim,
            input_dim,
            activation: Arc::new(Sigmoid),
            loss: Loss::default(),
        }
    }

    /// Input layer producing `dim` values from an external `(input_dim, 1)` input.
    pub fn input(input_dim: usize, dim: usize) -> Self {
        Self::new(LayerKind::Input, dim, input_dim)
    }

    pub fn hidden(dim: usize) -> Self {
        Self::new(LayerKind::Hidden, dim, 0)
    }

    pub fn output(dim: usize) -> Self {
        Self::new(LayerKind::Output, dim, 0)
    }

    pub fn activation<A: Activation + 'static>(self, activation: A) -> Self {
        Self {
            activation: Arc::new(activation),
            ..self
        }
    }

    pub fn loss(self, loss: Loss) -> Self {
        Self { loss, ..self }
    }

    /// Reject configurations the network could not train or save.
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.dim == 0 || (self.kind == LayerKind::Input && self.input_dim == 0) {
            return Err(Error::ZeroWidth {
                name: name.to_owned(),
            });
        }
        if self.kind != LayerKind::Output && self.loss == Loss::CrossEntropy {
            return Err(Error::MisplacedLoss {
                name: name.to_owned(),
            });
        }
        Ok(())
    }
}

/// Gradient buffer of one parameter matrix and the optimizer state beside it.
#[derive(Debug, Clone)]
pub struct Accumulator<S> {
    pub gradient: Matrix,
    pub state: S,
}

impl<S> Accumulator<S> {
    pub(crate) fn new<O: Optimizer<State = S>>(optimizer: &O, shape: (usize, usize)) -> Self {
        Self {
            gradient: Matrix::zeros(shape),
            state: optimizer.init_state(shape),
        }
    }
}

/// Learnable state held by one vertex of the network.
///
/// A layer owns one weight matrix per incoming connection, shaped
/// `(dim, source_dim)`, plus a `(dim, 1)` bias. Its cached output and error are
/// `(dim, 1)` column vectors. Gradient buffers exist only when the optimizer
/// is trainable.
#[derive(Debug, Clone)]
pub struct Layer<O: Optimizer> {
    kind: LayerKind,
    dim: usize,
    input_dim: usize,
    activation: Arc<dyn Activation>,
    loss: Loss,
    weights: BTreeMap<Source, Matrix>,
    bias: Matrix,
    output: Matrix,
    error: Matrix,
    weight_grads: BTreeMap<Source, Accumulator<O::State>>,
    bias_grad: Option<Accumulator<O::State>>,
    layer_state: O::LayerState,
}

impl<O: Optimizer> Layer<O> {
    pub fn new<R: Rng + ?Sized>(config: LayerConfig, optimizer: &O, rng: &mut R) -> Self {
        let LayerConfig {
            kind,
            dim,
            input_dim,
            activation,
            loss,
        } = config;
        let mut layer = Self {
            kind,
            dim,
            input_dim,
            activation,
            loss,
            weights: BTreeMap::new(),
            bias: matrix::filled(dim, 1, Fill::Uniform, rng),
            output: Matrix::zeros((dim, 1)),
            error: Matrix::zeros((dim, 1)),
            weight_grads: BTreeMap::new(),
            bias_grad: optimizer
                .trainable()
                .then(|| Accumulator::new(optimizer, (dim, 1))),
            layer_state: optimizer.init_layer_state(),
        };
        if kind == LayerKind::Input {
            layer.add_weight(Source::External, input_dim, optimizer, rng);
        }
        layer
    }

    /// Copy of `other`'s configuration, weights and bias bound to `optimizer`,
    /// with fresh buffers.
    pub fn rebind<P: Optimizer>(other: &Layer<P>, optimizer: &O) -> Self {
        let weight_grads = if optimizer.trainable() {
            other
                .weights
                .iter()
                .map(|(&source, w)| (source, Accumulator::new(optimizer, w.dim())))
                .collect()
        } else {
            BTreeMap::new()
        };
        Self {
            kind: other.kind,
            dim: other.dim,
            input_dim: other.input_dim,
            activation: Arc::clone(&other.activation),
            loss: other.loss,
            weights: other.weights.clone(),
            bias: other.bias.clone(),
            output: Matrix::zeros((other.dim, 1)),
            error: Matrix::zeros((other.dim, 1)),
            weight_grads,
            bias_grad: optimizer
                .trainable()
                .then(|| Accumulator::new(optimizer, (other.dim, 1))),
            layer_state: optimizer.init_layer_state(),
        }
    }

    /// Allocate the weight matrix for a connection from the layer at vertex
    /// `from`, whose output has `input_dim` rows.
    pub fn connect<R: Rng + ?Sized>(
        &mut self,
        from: usize,
        input_dim: usize,
        optimizer: &O,
        rng: &mut R,
    ) {
        self.add_weight(Source::Layer(from), input_dim, optimizer, rng);
    }

    fn add_weight<R: Rng + ?Sized>(
        &mut self,
        source: Source,
        input_dim: usize,
        optimizer: &O,
        rng: &mut R,
    ) {
        let shape = (self.dim, input_dim);
        self.weights
            .insert(source, matrix::filled(shape.0, shape.1, Fill::Uniform, rng));
        if optimizer.trainable() {
            self.weight_grads
                .insert(source, Accumulator::new(optimizer, shape));
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Width of the external input; zero for layers that are not inputs.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn activation(&self) -> &dyn Activation {
        self.activation.as_ref()
    }

    /// Whether the forward pass ends in a softmax and the backward pass uses
    /// the cross-entropy shortcut.
    pub fn is_softmax_output(&self) -> bool {
        self.kind == LayerKind::Output && self.loss == Loss::CrossEntropy
    }

    pub fn weight(&self, source: Source) -> Option<&Matrix> {
        self.weights.get(&source)
    }

    pub(crate) fn weight_mut(&mut self, source: Source) -> Option<&mut Matrix> {
        self.weights.get_mut(&source)
    }

    pub fn weights(&self) -> impl Iterator<Item = (Source, &Matrix)> {
        self.weights.iter().map(|(&source, w)| (source, w))
    }

    pub fn bias(&self) -> &Matrix {
        &self.bias
    }

    pub(crate) fn bias_mut(&mut self) -> &mut Matrix {
        &mut self.bias
    }

    pub fn output(&self) -> &Matrix {
        &self.output
    }

    pub(crate) fn set_output(&mut self, output: Matrix) {
        self.output = output;
    }

    pub fn error(&self) -> &Matrix {
        &self.error
    }

    pub(crate) fn set_error(&mut self, error: Matrix) {
        self.error = error;
    }

    pub fn weight_gradient(&self, source: Source) -> Option<&Matrix> {
        self.weight_grads.get(&source).map(|acc| &acc.gradient)
    }

    pub fn bias_gradient(&self) -> Option<&Matrix> {
        self.bias_grad.as_ref().map(|acc| &acc.gradient)
    }

    pub fn layer_state(&self) -> &O::LayerState {
        &self.layer_state
    }

    /// Local gradient of the loss with respect to this layer's pre-activation
    /// sum, from the current output and error.
    pub fn delta(&self, target: &Matrix) -> Result<Matrix> {
        if self.is_softmax_output() {
            matrix::sub(&self.output, target)
        } else {
            matrix::hadamard(&self.error, &self.activation.derivative(&self.output))
        }
    }

    /// Add one sample's parameter gradients and clear the error accumulator.
    pub(crate) fn accumulate(&mut self, weight_grads: Vec<(Source, Matrix)>, delta: &Matrix) {
        for (source, grad) in weight_grads {
            if let Some(acc) = self.weight_grads.get_mut(&source) {
                acc.gradient += &grad;
            }
        }
        if let Some(acc) = self.bias_grad.as_mut() {
            acc.gradient += delta;
        }
        self.error.fill(0.0);
    }

    /// Apply the optimizer to every parameter and zero the gradients.
    pub(crate) fn apply(&mut self, optimizer: &O, learning_rate: f64) {
        optimizer.begin_layer(&mut self.layer_state);
        for (source, acc) in self.weight_grads.iter_mut() {
            if let Some(weight) = self.weights.get_mut(source) {
                optimizer.update(
                    weight,
                    &acc.gradient,
                    &mut acc.state,
                    &self.layer_state,
                    learning_rate,
                );
            }
            acc.gradient.fill(0.0);
        }
        if let Some(acc) = self.bias_grad.as_mut() {
            optimizer.update(
                &mut self.bias,
                &acc.gradient,
                &mut acc.state,
                &self.layer_state,
                learning_rate,
            );
            acc.gradient.fill(0.0);
        }
    }

    /// Whether `other` has weights for the same sources with the same shapes.
    pub fn same_shape<P: Optimizer>(&self, other: &Layer<P>) -> bool {
        self.bias.dim() == other.bias.dim()
            && self.weights.len() == other.weights.len()
            && self
                .weights
                .iter()
                .all(|(source, w)| other.weights.get(source).map(|o| o.dim()) == Some(w.dim()))
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_rel_eq_arr2;
    use crate::optimizer::{Frozen, RmsProp, Sgd};
    use crate::Relu;

    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use ndarray_rand::rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn config_validation() {
        assert!(LayerConfig::input(2, 3).validate("in").is_ok());
        assert!(LayerConfig::output(3)
            .loss(Loss::CrossEntropy)
            .validate("out")
            .is_ok());
        assert!(matches!(
            LayerConfig::hidden(3).loss(Loss::CrossEntropy).validate("h"),
            Err(Error::MisplacedLoss { .. })
        ));
        assert!(matches!(
            LayerConfig::input(2, 3).loss(Loss::CrossEntropy).validate("in"),
            Err(Error::MisplacedLoss { .. })
        ));
        assert!(matches!(
            LayerConfig::input(0, 3).validate("in"),
            Err(Error::ZeroWidth { .. })
        ));
        assert!(matches!(
            LayerConfig::hidden(0).validate("h"),
            Err(Error::ZeroWidth { .. })
        ));
    }

    #[test]
    fn input_layer_owns_external_weight() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Layer::new(LayerConfig::input(3, 2), &Sgd, &mut rng);
        assert_eq!(layer.kind(), LayerKind::Input);
        assert_eq!(layer.weight(Source::External).unwrap().dim(), (2, 3));
        assert_eq!(layer.weight_gradient(Source::External).unwrap(), &Matrix::zeros((2, 3)));
        assert_eq!(layer.bias().dim(), (2, 1));
        assert_eq!(layer.output().dim(), (2, 1));
        assert_eq!(layer.bias_gradient().unwrap().dim(), (2, 1));
    }

    #[test]
    fn connect_allocates_weight_and_buffers() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = Layer::new(LayerConfig::hidden(4), &RmsProp::default(), &mut rng);
        assert!(layer.weight(Source::External).is_none());

        layer.connect(7, 5, &RmsProp::default(), &mut rng);
        let w = layer.weight(Source::Layer(7)).unwrap();
        assert_eq!(w.dim(), (4, 5));
        assert!(w.iter().all(|&x| (-1.0..1.0).contains(&x)));
        assert_eq!(layer.weight_gradient(Source::Layer(7)).unwrap().dim(), (4, 5));
    }

    #[test]
    fn frozen_layer_has_no_buffers() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = Layer::new(LayerConfig::output(2), &Frozen, &mut rng);
        layer.connect(0, 3, &Frozen, &mut rng);
        assert!(layer.weight(Source::Layer(0)).is_some());
        assert!(layer.weight_gradient(Source::Layer(0)).is_none());
        assert!(layer.bias_gradient().is_none());
    }

    #[test]
    fn rebind_copies_parameters_only() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut layer = Layer::new(LayerConfig::hidden(2).activation(Relu), &Sgd, &mut rng);
        layer.connect(0, 2, &Sgd, &mut rng);
        layer.set_output(arr2(&[[1.0], [2.0]]));

        let frozen = Layer::<Frozen>::rebind(&layer, &Frozen);
        assert!(frozen.same_shape(&layer));
        assert_eq!(frozen.weight(Source::Layer(0)), layer.weight(Source::Layer(0)));
        assert_eq!(frozen.bias(), layer.bias());
        assert_eq!(frozen.output(), &Matrix::zeros((2, 1)));
        assert!(frozen.bias_gradient().is_none());
    }

    #[test]
    fn delta_uses_output_derivative() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Layer::new(LayerConfig::hidden(2), &Sgd, &mut rng);
        layer.set_output(arr2(&[[0.5], [0.25]]));
        layer.set_error(arr2(&[[2.0], [-1.0]]));
        let target = Matrix::zeros((2, 1));
        // sigmoid'(y) = y (1 - y)
        assert_rel_eq_arr2!(layer.delta(&target).unwrap(), arr2(&[[0.5], [-0.1875]]));
    }

    #[test]
    fn softmax_output_delta_is_output_minus_target() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Layer::new(
            LayerConfig::output(2).loss(Loss::CrossEntropy),
            &Sgd,
            &mut rng,
        );
        assert!(layer.is_softmax_output());
        layer.set_output(arr2(&[[0.75], [0.25]]));
        let delta = layer.delta(&arr2(&[[1.0], [0.0]])).unwrap();
        assert_rel_eq_arr2!(delta, arr2(&[[-0.25], [0.25]]));
    }

    #[test]
    fn accumulate_then_apply_sgd() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Layer::new(LayerConfig::hidden(1), &Sgd, &mut rng);
        layer.connect(0, 2, &Sgd, &mut rng);
        let w0 = layer.weight(Source::Layer(0)).unwrap().clone();
        let b0 = layer.bias().clone();
        layer.set_error(arr2(&[[3.0]]));

        let delta = arr2(&[[1.0]]);
        layer.accumulate(vec![(Source::Layer(0), arr2(&[[1.0, 2.0]]))], &delta);
        layer.accumulate(vec![(Source::Layer(0), arr2(&[[1.0, 2.0]]))], &delta);
        assert_eq!(layer.error(), &Matrix::zeros((1, 1)));
        assert_rel_eq_arr2!(
            layer.weight_gradient(Source::Layer(0)).unwrap().clone(),
            arr2(&[[2.0, 4.0]])
        );

        layer.apply(&Sgd, 0.5);
        assert_rel_eq_arr2!(
            layer.weight(Source::Layer(0)).unwrap().clone(),
            &w0 - &arr2(&[[1.0, 2.0]])
        );
        assert_relative_eq!(layer.bias()[[0, 0]], b0[[0, 0]] - 1.0);
        assert_eq!(layer.weight_gradient(Source::Layer(0)).unwrap(), &Matrix::zeros((1, 2)));
        assert_eq!(layer.bias_gradient().unwrap(), &Matrix::zeros((1, 1)));
    }
}
