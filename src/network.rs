//! Training engine over a DAG of layers.
//!
//! A step is always `feed_forward`, then `gradient` (possibly several times to
//! accumulate a mini-batch), then `optimize`. All three walk the topological
//! order computed once by [`Mlp::generate`].

use std::collections::HashMap;

use log::{debug, warn};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::layer::{Layer, LayerConfig, LayerKind, Source};
use crate::matrix::{self, Matrix};
use crate::optimizer::{Frozen, Optimizer};

/// External inputs keyed by input-layer name, each shaped `(input_dim, 1)`.
pub type Inputs = HashMap<String, Matrix>;

#[derive(Debug, Clone)]
pub struct Mlp<O: Optimizer> {
    graph: Graph<Layer<O>>,
    optimizer: O,
    rng: StdRng,
    generated: bool,
    // `gradient` calls since the last `optimize`.
    pending: usize,
}

impl<O: Optimizer> Mlp<O> {
    /// Empty network whose weights are drawn from an entropy-seeded generator.
    pub fn new(optimizer: O) -> Self {
        Self::with_rng(optimizer, StdRng::from_entropy())
    }

    /// Empty network with reproducible weight initialisation.
    pub fn with_seed(optimizer: O, seed: u64) -> Self {
        Self::with_rng(optimizer, StdRng::seed_from_u64(seed))
    }

    fn with_rng(optimizer: O, rng: StdRng) -> Self {
        Self {
            graph: Graph::new(),
            optimizer,
            rng,
            generated: false,
            pending: 0,
        }
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn graph(&self) -> &Graph<Layer<O>> {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut Graph<Layer<O>> {
        &mut self.graph
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn is_dag(&self) -> bool {
        self.graph.is_dag()
    }

    /// Number of `gradient` calls accumulated since the last `optimize`.
    pub fn pending_gradients(&self) -> usize {
        self.pending
    }

    pub fn layer(&self, name: &str) -> Result<&Layer<O>> {
        let index = self.graph.find_vertex_or_err(name)?;
        self.graph.object(index)
    }

    /// Cached output of the named layer from the last forward pass.
    pub fn output(&self, name: &str) -> Result<&Matrix> {
        self.layer(name).map(Layer::output)
    }

    /// Layer names in evaluation order.
    pub fn topology_names(&self) -> Vec<&str> {
        self.graph
            .topology()
            .iter()
            .filter_map(|&i| self.graph.name(i).ok())
            .collect()
    }

    pub fn add_layer(&mut self, name: &str, config: LayerConfig) -> Result<usize> {
        if self.generated {
            return Err(Error::AlreadyGenerated);
        }
        config.validate(name)?;
        let layer = Layer::new(config, &self.optimizer, &mut self.rng);
        Ok(self.graph.insert_vertex(layer, name))
    }

    /// Feed the output of `from` into `to`, allocating the weight matrix on `to`.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<()> {
        if self.generated {
            return Err(Error::AlreadyGenerated);
        }
        let from_index = self.graph.find_vertex_or_err(from)?;
        let to_index = self.graph.find_vertex_or_err(to)?;
        if self.graph.object(to_index)?.kind() == LayerKind::Input {
            return Err(Error::InputConnection {
                name: to.to_owned(),
            });
        }
        if self
            .graph
            .edges()
            .iter()
            .any(|e| e.from == from_index && e.to == to_index)
        {
            return Err(Error::DuplicateConnection {
                from: from.to_owned(),
                to: to.to_owned(),
            });
        }
        let input_dim = self.graph.object(from_index)?.dim();
        self.graph.insert_edge(from_index, to_index, 1.0)?;

        let Self {
            graph,
            optimizer,
            rng,
            ..
        } = self;
        graph
            .object_mut(to_index)?
            .connect(from_index, input_dim, optimizer, rng);
        Ok(())
    }

    /// Freeze the topology. Must succeed once before any training call.
    pub fn generate(&mut self) -> Result<()> {
        if self.generated {
            return Err(Error::AlreadyGenerated);
        }
        for vertex in self.graph.vertices() {
            if vertex.object.kind() != LayerKind::Input && vertex.indegree == 0 {
                return Err(Error::Disconnected {
                    name: vertex.name.clone(),
                });
            }
        }
        if !self.graph.generate() {
            return Err(Error::GraphNotAcyclic);
        }
        self.generated = true;
        debug!("generated topology: {:?}", self.topology_names());
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.generated {
            return Err(Error::NotGenerated);
        }
        if !self.graph.is_dag() {
            return Err(Error::GraphNotAcyclic);
        }
        Ok(())
    }

    fn check_inputs(&self, inputs: &Inputs) -> Result<()> {
        for vertex in self.graph.vertices() {
            let layer = &vertex.object;
            if layer.kind() != LayerKind::Input {
                continue;
            }
            let input = inputs.get(&vertex.name).ok_or_else(|| Error::MissingInput {
                name: vertex.name.clone(),
            })?;
            matrix::ensure_shape(input, (layer.input_dim(), 1))?;
        }
        Ok(())
    }

    fn check_target(&self, target: &Matrix) -> Result<()> {
        for vertex in self.graph.vertices() {
            if vertex.object.kind() == LayerKind::Output {
                matrix::ensure_shape(target, (vertex.object.dim(), 1))?;
            }
        }
        Ok(())
    }

    fn external_input<'a>(&self, inputs: &'a Inputs, index: usize) -> Result<&'a Matrix> {
        let name = self.graph.name(index)?;
        inputs.get(name).ok_or_else(|| Error::MissingInput {
            name: name.to_owned(),
        })
    }

    fn weight<'a>(&self, layer: &'a Layer<O>, source: Source, index: usize) -> Result<&'a Matrix> {
        layer.weight(source).ok_or_else(|| Error::Disconnected {
            name: self.graph.name(index).unwrap_or_default().to_owned(),
        })
    }

    /// Evaluate every layer in topological order and cache its output.
    pub fn feed_forward(&mut self, inputs: &Inputs) -> Result<()> {
        self.ensure_ready()?;
        self.check_inputs(inputs)?;

        let order = self.graph.topology().to_vec();
        for current in order {
            let output = {
                let layer = self.graph.object(current)?;
                let mut sum = layer.bias().clone();
                if layer.kind() == LayerKind::Input {
                    let weight = self.weight(layer, Source::External, current)?;
                    sum += &matrix::dot(weight, self.external_input(inputs, current)?)?;
                } else {
                    for &from in self.graph.previous(current) {
                        let weight = self.weight(layer, Source::Layer(from), current)?;
                        sum += &matrix::dot(weight, self.graph.object(from)?.output())?;
                    }
                }
                let output = layer.activation().compute(&sum);
                if layer.is_softmax_output() {
                    matrix::softmax(&output)
                } else {
                    output
                }
            };
            self.graph.object_mut(current)?.set_output(output);
        }
        Ok(())
    }

    /// Backpropagate `target` from the outputs of the last forward pass and
    /// add the parameter gradients to the layers' accumulators.
    ///
    /// Gradients keep accumulating over calls until [`Mlp::optimize`].
    pub fn gradient(&mut self, inputs: &Inputs, target: &Matrix) -> Result<()> {
        self.ensure_ready()?;
        if !self.optimizer.trainable() {
            return Err(Error::Frozen);
        }
        self.check_inputs(inputs)?;
        self.check_target(target)?;

        let order = self.graph.topology().to_vec();

        // Error of each layer's output, consumers before producers. A
        // consumer hands back its weight for this edge, transposed, applied
        // to its own local gradient; contributions from all consumers add up.
        for &current in order.iter().rev() {
            let error = {
                let layer = self.graph.object(current)?;
                if layer.kind() == LayerKind::Output {
                    layer.loss().error(layer.output(), target)?
                } else {
                    let mut error = layer.error().clone();
                    for &to in self.graph.nexts(current) {
                        let next = self.graph.object(to)?;
                        let weight = self.weight(next, Source::Layer(current), to)?;
                        error += &weight.t().dot(&next.delta(target)?);
                    }
                    error
                }
            };
            self.graph.object_mut(current)?.set_error(error);
        }

        for &current in &order {
            let (delta, weight_grads) = {
                let layer = self.graph.object(current)?;
                let delta = layer.delta(target)?;
                let weight_grads = if layer.kind() == LayerKind::Input {
                    let input = self.external_input(inputs, current)?;
                    vec![(Source::External, delta.dot(&input.t()))]
                } else {
                    self.graph
                        .previous(current)
                        .iter()
                        .map(|&from| -> Result<(Source, Matrix)> {
                            let output = self.graph.object(from)?.output();
                            Ok((Source::Layer(from), delta.dot(&output.t())))
                        })
                        .collect::<Result<Vec<_>>>()?
                };
                (delta, weight_grads)
            };
            self.graph
                .object_mut(current)?
                .accumulate(weight_grads, &delta);
        }

        self.pending += 1;
        Ok(())
    }

    /// Apply the accumulated gradients with the network's optimizer, then
    /// zero them. Does nothing if no gradient is pending.
    pub fn optimize(&mut self, learning_rate: f64) -> Result<()> {
        self.ensure_ready()?;
        if !self.optimizer.trainable() {
            return Ok(());
        }
        if self.pending == 0 {
            warn!("optimize called without accumulated gradients");
            return Ok(());
        }

        debug!(
            "optimize: {} accumulated gradient(s), learning rate {}",
            self.pending, learning_rate
        );
        let order = self.graph.topology().to_vec();
        let Self {
            graph, optimizer, ..
        } = self;
        for current in order {
            graph.object_mut(current)?.apply(optimizer, learning_rate);
        }
        self.pending = 0;
        Ok(())
    }

    /// Summed loss of every output layer against `target`, from the last
    /// forward pass.
    pub fn loss(&self, target: &Matrix) -> Result<f64> {
        self.ensure_ready()?;
        self.check_target(target)?;
        self.graph
            .vertices()
            .iter()
            .filter(|v| v.object.kind() == LayerKind::Output)
            .map(|v| v.object.loss().value(v.object.output(), target))
            .sum()
    }

    /// Deep copy of the topology, weights and biases, bound to the no-op
    /// optimizer. The copy is independent of `self`.
    pub fn snapshot(&self) -> Mlp<Frozen> {
        Mlp {
            graph: self.graph.map(|layer| Layer::rebind(layer, &Frozen)),
            optimizer: Frozen,
            rng: self.rng.clone(),
            generated: self.generated,
            pending: 0,
        }
    }

    fn check_same_topology<P: Optimizer>(&self, dst: &Mlp<P>) -> Result<()> {
        let (ours, theirs) = (&self.graph, &dst.graph);
        let same_edges = ours.edges().len() == theirs.edges().len()
            && ours
                .edges()
                .iter()
                .zip(theirs.edges())
                .all(|(a, b)| a.from == b.from && a.to == b.to);
        let same_layers = ours.len() == theirs.len()
            && ours
                .vertices()
                .iter()
                .zip(theirs.vertices())
                .all(|(a, b)| a.object.same_shape(&b.object));
        if !(same_edges && same_layers) {
            return Err(Error::TopologyMismatch);
        }
        Ok(())
    }

    /// Blend this network's parameters into `dst`:
    /// `dst = dst * (1 - alpha) + self * alpha`.
    pub fn soft_update_to<P: Optimizer>(&self, dst: &mut Mlp<P>, alpha: f64) -> Result<()> {
        self.ensure_ready()?;
        self.check_same_topology(dst)?;
        for (index, vertex) in self.graph.vertices().iter().enumerate() {
            let target = dst.graph.object_mut(index)?;
            for (source, weight) in vertex.object.weights() {
                if let Some(dst_weight) = target.weight_mut(source) {
                    matrix::blend(dst_weight, weight, alpha)?;
                }
            }
            matrix::blend(target.bias_mut(), vertex.object.bias(), alpha)?;
        }
        Ok(())
    }

    /// Overwrite `dst`'s weights and biases with this network's.
    pub fn copy_to<P: Optimizer>(&self, dst: &mut Mlp<P>) -> Result<()> {
        self.check_same_topology(dst)?;
        for (index, vertex) in self.graph.vertices().iter().enumerate() {
            let target = dst.graph.object_mut(index)?;
            for (source, weight) in vertex.object.weights() {
                if let Some(dst_weight) = target.weight_mut(source) {
                    dst_weight.assign(weight);
                }
            }
            target.bias_mut().assign(vertex.object.bias());
        }
        Ok(())
    }
}
