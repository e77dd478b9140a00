//! canopy: parallel cover-tree construction and fixed-radius neighbor
//! search.
//!
//! A cover tree is a hierarchical space-partitioning tree in which every
//! vertex carries a *cover radius* bounding the distance from its point to
//! any point in its subtree. canopy builds one with a hub-based parallel
//! algorithm in which groups of points ("hubs") are iteratively partitioned under
//! common centers, and uses it to enumerate, for every point, all points
//! within a fixed radius (the epsilon graph).
//!
//! # Components
//!
//! - [`points`]: flat point storage and the binary point-file format
//! - [`metric`]: pluggable distance kernels ([`Euclidean`])
//! - [`tree`]: the insertion arena, hub refinement, and [`CoverTree`] with
//!   its two construction modes (level-synchronous rounds and per-subtree
//!   tasks)
//! - [`graph`]: epsilon-graph construction and brute-force verification
//! - [`dist`]: the two-phase distributed builder over a [`dist::Communicator`]
//!
//! # Example
//!
//! ```
//! use canopy::{BuildParams, CoverTree, Euclidean, PointSet};
//!
//! # fn main() -> canopy::Result<()> {
//! let mut points = PointSet::new(2)?;
//! points.push(&[0.0, 0.0])?;
//! points.push(&[1.0, 0.0])?;
//! points.push(&[0.0, 4.0])?;
//!
//! let tree = CoverTree::build(&points, &Euclidean, &BuildParams::default())?;
//! let near_origin = tree.query(&points, &Euclidean, &[0.0, 0.0], 1.5);
//! assert_eq!(near_origin, vec![0, 1]);
//! # Ok(())
//! # }
//! ```

pub mod dist;
pub mod error;
pub mod graph;
pub mod metric;
pub mod points;
pub mod tree;

pub use error::{CoverError, Result};
pub use metric::{Euclidean, Metric};
pub use points::PointSet;
pub use tree::{BuildParams, CoverTree};
