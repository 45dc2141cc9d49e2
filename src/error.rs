//! Error types shared by the device layer, the tensors and the network engine.

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Platform, queue, buffer or kernel failure on the compute device
    #[error("device error: {0}")]
    Device(String),

    /// OpenCL runtime failure
    #[cfg(feature = "opencl")]
    #[error("OpenCL error: {0}")]
    Ocl(#[from] ocl::Error),

    /// No platform satisfies the requested criteria
    #[error("no compatible device: {0}")]
    NoCompatibleDevice(String),

    /// Operand shapes disagree
    #[error("shape mismatch in {op}: expected {expected}, got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },

    /// Index outside of a batch, a node list or a parameter list
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Invalid topology, detected when building the graph
    #[error("invalid topology: {0}")]
    Topology(String),

    /// A saved model does not fit the graph it is loaded into
    #[error("topology mismatch: {0}")]
    TopologyMismatch(String),

    /// Malformed model file or topology description
    #[error("format error: {0}")]
    Format(String),

    /// Failure reported by an input set
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape_mismatch<E, A>(op: &'static str, expected: E, actual: A) -> Error
    where
        E: std::fmt::Debug,
        A: std::fmt::Debug,
    {
        Error::ShapeMismatch {
            op,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Returns true for errors a controller may skip over: dataset and file access only. Device
    /// and shape errors are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io(_) | Error::Dataset(_) => true,
            _ => false,
        }
    }
}
