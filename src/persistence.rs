//! Plain-text weight files.
//!
//! Layers are written in topological order. For each layer come its weight
//! matrices (the external input weight of an input layer, otherwise one per
//! incoming connection in connection order) and then its bias. Every matrix row
//! is one line of space-separated numbers. The file carries no shapes, so it
//! can only be read back into a network with the same topology.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::layer::{LayerKind, Source};
use crate::matrix::Matrix;
use crate::network::Mlp;
use crate::optimizer::Optimizer;

pub fn write_matrix<W: Write>(writer: &mut W, matrix: &Matrix) -> Result<()> {
    for row in matrix.rows() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}

/// Reads matrices of known shape from consecutive non-empty lines.
pub struct MatrixReader<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
}

impl<R: BufRead> MatrixReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    pub fn read(&mut self, shape: (usize, usize)) -> Result<Matrix> {
        let (rows, cols) = shape;
        let mut values = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            let line = self.next_line()?.ok_or(Error::Parse {
                line: self.line_number,
                message: format!("expected {} more row(s)", rows - values.len() / cols.max(1)),
            })?;
            let row = line
                .split_whitespace()
                .map(|token| token.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Parse {
                    line: self.line_number,
                    message: e.to_string(),
                })?;
            if row.len() != cols {
                return Err(Error::Parse {
                    line: self.line_number,
                    message: format!("expected {} values, found {}", cols, row.len()),
                });
            }
            values.extend(row);
        }
        Matrix::from_shape_vec(shape, values).map_err(|e| Error::Parse {
            line: self.line_number,
            message: e.to_string(),
        })
    }

    /// Fails if anything but blank lines is left.
    pub fn finish(mut self) -> Result<()> {
        match self.next_line()? {
            Some(_) => Err(Error::Parse {
                line: self.line_number,
                message: "unexpected trailing data".to_owned(),
            }),
            None => Ok(()),
        }
    }
}

impl<O: Optimizer> Mlp<O> {
    /// `(vertex, source)` of every weight matrix in file order.
    fn weight_order(&self) -> Result<Vec<(usize, Source)>> {
        if !self.is_generated() {
            return Err(Error::NotGenerated);
        }
        let graph = self.graph();
        let mut order = Vec::new();
        for &current in graph.topology() {
            if graph.object(current)?.kind() == LayerKind::Input {
                order.push((current, Source::External));
            } else {
                order.extend(
                    graph
                        .previous(current)
                        .iter()
                        .map(|&from| (current, Source::Layer(from))),
                );
            }
        }
        Ok(order)
    }

    pub fn write_weights<W: Write>(&self, mut writer: W) -> Result<()> {
        let order = self.weight_order()?;
        let graph = self.graph();
        for &current in graph.topology() {
            let layer = graph.object(current)?;
            for &(_, source) in order.iter().filter(|(v, _)| *v == current) {
                let weight = layer.weight(source).ok_or(Error::TopologyMismatch)?;
                write_matrix(&mut writer, weight)?;
            }
            write_matrix(&mut writer, layer.bias())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Replace every weight and bias with the ones read from `reader`. Nothing
    /// is changed unless the whole input parses.
    pub fn read_weights<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let order = self.weight_order()?;
        let mut matrices = MatrixReader::new(reader);
        let mut weights = Vec::with_capacity(order.len());
        let mut biases = Vec::new();
        let graph = self.graph();
        for &current in graph.topology() {
            let layer = graph.object(current)?;
            for &(_, source) in order.iter().filter(|(v, _)| *v == current) {
                let shape = layer.weight(source).ok_or(Error::TopologyMismatch)?.dim();
                weights.push((current, source, matrices.read(shape)?));
            }
            biases.push((current, matrices.read(layer.bias().dim())?));
        }
        matrices.finish()?;

        let graph = self.graph_mut();
        for (current, source, weight) in weights {
            if let Some(w) = graph.object_mut(current)?.weight_mut(source) {
                *w = weight;
            }
        }
        for (current, bias) in biases {
            *graph.object_mut(current)?.bias_mut() = bias;
        }
        Ok(())
    }

    /// Write the weights to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_weights(BufWriter::new(file))?;
        debug!("saved weights to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())?;
        self.read_weights(BufReader::new(file))?;
        debug!("loaded weights from {}", path.as_ref().display());
        Ok(())
    }
}
