//! Cover-tree construction: the insertion arena, hub refinement, and the
//! parallel builder.

pub(crate) mod hub;
pub mod insert;

mod build;

pub use build::{BuildParams, CoverTree};
pub use insert::{Ball, InsertTree, VertexId};
