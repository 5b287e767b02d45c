use thiserror::Error;

/// Errors raised while building or training a network.
///
/// All of them are construction mistakes on the caller's side. An operation
/// that returns one of these leaves the network untouched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("unknown vertex `{name}`")]
    UnknownVertex { name: String },

    #[error("vertex index {index} out of range for a graph of {len} vertices")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("an edge needs at least two vertices, the graph has {count}")]
    TooFewVertices { count: usize },

    #[error("graph contains a cycle")]
    GraphNotAcyclic,

    #[error("topology has not been generated")]
    NotGenerated,

    #[error("topology is already generated, the network can no longer change shape")]
    AlreadyGenerated,

    #[error("layer `{name}` has no incoming connection")]
    Disconnected { name: String },

    #[error("`{from}` is already connected to `{to}`")]
    DuplicateConnection { from: String, to: String },

    #[error("layer `{name}` has zero width")]
    ZeroWidth { name: String },

    #[error("only output layers can use cross-entropy, `{name}` is not one")]
    MisplacedLoss { name: String },

    #[error("sequence has {actual} steps, expected {expected}")]
    SequenceMismatch { expected: usize, actual: usize },

    #[error("input layer `{name}` cannot consume another layer")]
    InputConnection { name: String },

    #[error("no input given for input layer `{name}`")]
    MissingInput { name: String },

    #[error("network is frozen and keeps no gradients")]
    Frozen,

    #[error("networks do not share the same topology")]
    TopologyMismatch,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed weight file at line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
