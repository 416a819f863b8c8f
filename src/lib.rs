//! Canopy is a block-structured adaptive mesh library built on a spatial
//! tree. Space is divided recursively into nodes, each split into `k^d`
//! children; every leaf carries a block of field data with ghost zones. The
//! tree keeps same-level neighbor links so that refinement, 2:1 balancing,
//! coalescing, and neighbor queries never search from the root. Ghost zones
//! are filled from neighboring blocks at the same or an adjacent level, with
//! restriction and prolongation between levels, and with messages between
//! execution units ordered so that pairwise exchanges cannot deadlock.

pub mod adjacency_list;
pub mod block;
pub mod config;
pub mod criterion;
pub mod error;
pub mod exchange;
pub mod face;
pub mod field;
pub mod index_space;
pub mod mesh;
pub mod message;
pub mod node;
pub mod resample;
pub mod tree;

pub use error::Error;
pub use mesh::Mesh;
pub use tree::Tree;
