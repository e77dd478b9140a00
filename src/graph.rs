//! Epsilon-graph construction.
//!
//! The epsilon graph connects every pair of points within distance `r`. It
//! is built by querying the cover tree once per point, in parallel; the
//! brute-force verifier recomputes each neighborhood by full scan.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;

use crate::error::{CoverError, Result};
use crate::metric::Metric;
use crate::points::PointSet;
use crate::tree::CoverTree;

/// Adjacency lists keyed by point id; each list is sorted ascending.
pub type EpsilonGraph = Vec<Vec<usize>>;

/// Enumerate, for every point, all points within `radius` (including the
/// point itself).
pub fn build_epsilon_graph<M: Metric>(
    tree: &CoverTree,
    points: &PointSet,
    metric: &M,
    radius: f64,
) -> EpsilonGraph {
    (0..points.len())
        .into_par_iter()
        .map(|id| tree.query(points, metric, points.point(id), radius))
        .collect()
}

/// Total directed edge count of a graph.
#[must_use]
pub fn num_edges(graph: &EpsilonGraph) -> usize {
    graph.iter().map(Vec::len).sum()
}

/// Compare a graph against the brute-force neighborhood of every point.
pub fn graph_is_correct<M: Metric>(
    points: &PointSet,
    metric: &M,
    radius: f64,
    graph: &EpsilonGraph,
) -> bool {
    if graph.len() != points.len() {
        return false;
    }
    (0..points.len()).into_par_iter().all(|i| {
        let want: Vec<usize> = (0..points.len())
            .filter(|&j| metric.distance(points.point(i), points.point(j)) <= radius)
            .collect();
        graph[i] == want
    })
}

/// Write `src dst` edge lines, one per edge, adding `offset` to the source
/// ids (the caller's global offset in a partitioned run; 0 otherwise).
pub fn write_graph<P: AsRef<Path>>(path: P, graph: &EpsilonGraph, offset: usize) -> Result<()> {
    let file = File::create(path).map_err(|e| CoverError::Io {
        op: "create",
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    for (src, neighbors) in graph.iter().enumerate() {
        for &dst in neighbors {
            writeln!(writer, "{} {}", src + offset, dst).map_err(|e| CoverError::Io {
                op: "write",
                source: e,
            })?;
        }
    }
    writer.flush().map_err(|e| CoverError::Io {
        op: "write",
        source: e,
    })
}

/// Render edge lines into a byte buffer (the distributed gather path).
#[must_use]
pub fn graph_lines(graph: &EpsilonGraph, offset: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for (src, neighbors) in graph.iter().enumerate() {
        for &dst in neighbors {
            out.extend_from_slice(format!("{} {}\n", src + offset, dst).as_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Euclidean;
    use crate::tree::BuildParams;

    fn corners() -> PointSet {
        let mut set = PointSet::new(2).unwrap();
        for p in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]] {
            set.push(&p).unwrap();
        }
        set
    }

    #[test]
    fn graph_matches_brute_force() {
        let points = corners();
        let params = BuildParams {
            min_hub_size: 1,
            ..BuildParams::default()
        };
        let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();
        let graph = build_epsilon_graph(&tree, &points, &Euclidean, 1.2);

        assert!(graph_is_correct(&points, &Euclidean, 1.2, &graph));
        assert_eq!(graph[0], vec![0, 1, 2]);
        assert_eq!(graph[3], vec![3]);
        assert_eq!(num_edges(&graph), 8);
    }

    #[test]
    fn perturbed_graph_fails_verification() {
        let points = corners();
        let params = BuildParams::default();
        let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();
        let mut graph = build_epsilon_graph(&tree, &points, &Euclidean, 1.2);
        graph[3].push(0);
        assert!(!graph_is_correct(&points, &Euclidean, 1.2, &graph));
    }

    #[test]
    fn edge_lines_carry_the_offset() {
        let graph: EpsilonGraph = vec![vec![1], vec![0]];
        let text = String::from_utf8(graph_lines(&graph, 10)).unwrap();
        assert_eq!(text, "10 1\n11 0\n");
    }
}
