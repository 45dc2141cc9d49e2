//! Network description, the resolved execution graph and its per-node storage.
mod graph;
mod loss;
mod storage;
mod topology;

pub use self::graph::*;
pub use self::loss::*;
pub use self::storage::*;
pub use self::topology::{InputRef, NodeSpec, Topology};
