//! Generic directed graph stored as flat vertex and edge arenas.
//!
//! Vertices are addressed by their insertion index. The adjacency lists
//! (`previous`, `nexts`) and the topological order are derived data rebuilt
//! wholesale by [`Graph::generate`].

use std::collections::VecDeque;

use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    /// Free-form tag for graph algorithms; training ignores it.
    pub weight: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Vertex<T> {
    pub name: String,
    pub indegree: usize,
    pub visited: bool,
    pub object: T,
}

#[derive(Debug, Clone)]
pub struct Graph<T> {
    vertices: Vec<Vertex<T>>,
    edges: Vec<Edge>,
    previous: Vec<Vec<usize>>,
    nexts: Vec<Vec<usize>>,
    topology: Vec<usize>,
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            previous: Vec::new(),
            nexts: Vec::new(),
            topology: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// True when the last [`Graph::generate`] ordered every vertex.
    pub fn is_dag(&self) -> bool {
        self.topology.len() == self.vertices.len()
    }

    pub fn vertices(&self) -> &[Vertex<T>] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, index: usize) -> Result<&Vertex<T>> {
        let len = self.vertices.len();
        self.vertices
            .get(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    pub fn object(&self, index: usize) -> Result<&T> {
        self.vertex(index).map(|v| &v.object)
    }

    pub fn object_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.vertices.len();
        self.vertices
            .get_mut(index)
            .map(|v| &mut v.object)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        self.vertex(index).map(|v| v.name.as_str())
    }

    /// Sources of the edges entering `index`, as of the last generation.
    pub fn previous(&self, index: usize) -> &[usize] {
        self.previous.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Destinations of the edges leaving `index`, as of the last generation.
    pub fn nexts(&self, index: usize) -> &[usize] {
        self.nexts.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn topology(&self) -> &[usize] {
        &self.topology
    }

    /// Append a vertex and return its index. Names are not checked for
    /// uniqueness; lookups resolve to the first match.
    pub fn insert_vertex(&mut self, object: T, name: &str) -> usize {
        self.vertices.push(Vertex {
            name: name.to_owned(),
            indegree: 0,
            visited: false,
            object,
        });
        self.vertices.len() - 1
    }

    pub fn insert_edge(&mut self, from: usize, to: usize, weight: f64) -> Result<()> {
        let len = self.vertices.len();
        if len < 2 {
            return Err(Error::TooFewVertices { count: len });
        }
        for index in [from, to] {
            if index >= len {
                return Err(Error::IndexOutOfRange { index, len });
            }
        }
        self.edges.push(Edge {
            from,
            to,
            weight,
            enabled: true,
        });
        self.vertices[to].indegree += 1;
        // The old order no longer covers this edge.
        self.topology.clear();
        Ok(())
    }

    pub fn insert_edge_by_name(&mut self, from: &str, to: &str, weight: f64) -> Result<()> {
        if self.vertices.len() < 2 {
            return Err(Error::TooFewVertices {
                count: self.vertices.len(),
            });
        }
        let from = self.find_vertex_or_err(from)?;
        let to = self.find_vertex_or_err(to)?;
        self.insert_edge(from, to, weight)
    }

    pub fn find_vertex(&self, name: &str) -> Option<usize> {
        self.vertices.iter().position(|v| v.name == name)
    }

    pub(crate) fn find_vertex_or_err(&self, name: &str) -> Result<usize> {
        self.find_vertex(name).ok_or_else(|| Error::UnknownVertex {
            name: name.to_owned(),
        })
    }

    /// Same vertices, edges and derived order, with every object mapped by `f`.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Graph<U> {
        Graph {
            vertices: self
                .vertices
                .iter()
                .map(|v| Vertex {
                    name: v.name.clone(),
                    indegree: v.indegree,
                    visited: v.visited,
                    object: f(&v.object),
                })
                .collect(),
            edges: self.edges.clone(),
            previous: self.previous.clone(),
            nexts: self.nexts.clone(),
            topology: self.topology.clone(),
        }
    }

    /// Rebuild the adjacency lists from the edge list and sort the vertices
    /// topologically. Returns whether the graph is acyclic.
    pub fn generate(&mut self) -> bool {
        let n = self.vertices.len();
        self.previous = vec![Vec::new(); n];
        self.nexts = vec![Vec::new(); n];
        for edge in &self.edges {
            self.nexts[edge.from].push(edge.to);
            self.previous[edge.to].push(edge.from);
        }
        self.toposort()
    }

    /// Kahn's algorithm. Zero-indegree vertices are seeded in index order and
    /// the queue is FIFO, so equal graphs always produce equal orders.
    pub fn toposort(&mut self) -> bool {
        self.topology.clear();
        let mut indegrees = self.vertices.iter().map(|v| v.indegree).collect::<Vec<_>>();
        let mut queue = (0..self.vertices.len())
            .filter(|&i| indegrees[i] == 0)
            .collect::<VecDeque<_>>();

        while let Some(index) = queue.pop_front() {
            self.topology.push(index);
            for edge in self.edges.iter().filter(|e| e.from == index) {
                indegrees[edge.to] -= 1;
                if indegrees[edge.to] == 0 {
                    queue.push_back(edge.to);
                }
            }
        }

        debug!(
            "toposort ordered {} of {} vertices",
            self.topology.len(),
            self.vertices.len()
        );
        self.is_dag()
    }

    fn clear_visit(&mut self) {
        for vertex in &mut self.vertices {
            vertex.visited = false;
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.vertices.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    /// Breadth-first traversal from `start`, following edges in insertion order.
    pub fn bfs(&mut self, start: usize) -> Result<Vec<usize>> {
        self.check_index(start)?;
        self.clear_visit();

        let mut sequence = vec![start];
        let mut queue = VecDeque::from([start]);
        self.vertices[start].visited = true;
        while let Some(index) = queue.pop_front() {
            for edge in &self.edges {
                if edge.from == index && !self.vertices[edge.to].visited {
                    self.vertices[edge.to].visited = true;
                    sequence.push(edge.to);
                    queue.push_back(edge.to);
                }
            }
        }
        Ok(sequence)
    }

    /// Iterative depth-first traversal from `start`.
    pub fn dfs(&mut self, start: usize) -> Result<Vec<usize>> {
        self.check_index(start)?;
        self.clear_visit();

        let mut sequence = vec![start];
        let mut stack = vec![start];
        self.vertices[start].visited = true;
        while let Some(&index) = stack.last() {
            let next = self
                .edges
                .iter()
                .find(|e| e.from == index && !self.vertices[e.to].visited)
                .map(|e| e.to);
            match next {
                Some(to) => {
                    self.vertices[to].visited = true;
                    sequence.push(to);
                    stack.push(to);
                }
                None => {
                    stack.pop();
                }
            }
        }
        Ok(sequence)
    }

    /// Recursive depth-first traversal from `start`. Visits the same vertices
    /// in the same order as [`Graph::dfs`].
    pub fn rdfs(&mut self, start: usize) -> Result<Vec<usize>> {
        self.check_index(start)?;
        self.clear_visit();

        let mut sequence = Vec::new();
        self.visit_recursive(start, &mut sequence);
        Ok(sequence)
    }

    fn visit_recursive(&mut self, index: usize, sequence: &mut Vec<usize>) {
        sequence.push(index);
        self.vertices[index].visited = true;
        for i in 0..self.edges.len() {
            let to = self.edges[i].to;
            if self.edges[i].from == index && !self.vertices[to].visited {
                self.visit_recursive(to, sequence);
            }
        }
    }
}
