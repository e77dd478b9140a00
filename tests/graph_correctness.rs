//! Epsilon-graph correctness against brute force.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use canopy::graph::{build_epsilon_graph, graph_is_correct, num_edges};
use canopy::{BuildParams, CoverTree, Euclidean, Metric, PointSet};

fn uniform_points(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = PointSet::new(dim).unwrap();
    for _ in 0..n {
        let row: Vec<f64> = (0..dim).map(|_| rng.random::<f64>()).collect();
        points.push(&row).unwrap();
    }
    points
}

#[test]
fn thousand_uniform_points_in_4d() {
    let points = uniform_points(1000, 4, 42);
    let tree = CoverTree::build(&points, &Euclidean, &BuildParams::default()).unwrap();
    assert!(tree.is_correct(&points, &Euclidean));

    let graph = build_epsilon_graph(&tree, &points, &Euclidean, 0.2);
    assert!(graph_is_correct(&points, &Euclidean, 0.2, &graph));

    // Every point neighbors itself, so the graph has at least n edges.
    assert!(num_edges(&graph) >= points.len());
}

#[test]
fn task_mode_builds_the_same_graph() {
    let points = uniform_points(400, 3, 9);
    let synchronous = CoverTree::build(&points, &Euclidean, &BuildParams::default()).unwrap();
    let tasked = CoverTree::build(
        &points,
        &Euclidean,
        &BuildParams {
            level_synch: false,
            ..BuildParams::default()
        },
    )
    .unwrap();

    let a = build_epsilon_graph(&synchronous, &points, &Euclidean, 0.25);
    let b = build_epsilon_graph(&tasked, &points, &Euclidean, 0.25);
    assert_eq!(a, b);
    assert!(graph_is_correct(&points, &Euclidean, 0.25, &a));
}

#[test]
fn off_sample_queries_are_exact() {
    let points = uniform_points(200, 2, 123);
    let params = BuildParams {
        min_hub_size: 4,
        ..BuildParams::default()
    };
    let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();

    let mut rng = StdRng::seed_from_u64(321);
    for _ in 0..50 {
        let q = [rng.random::<f64>() * 1.5 - 0.25, rng.random::<f64>() * 1.5 - 0.25];
        let radius = rng.random::<f64>() * 0.4;

        let got = tree.query(&points, &Euclidean, &q, radius);
        let want: Vec<usize> = (0..points.len())
            .filter(|&j| Euclidean.distance(&q, points.point(j)) <= radius)
            .collect();
        assert_eq!(got, want);
    }
}

#[test]
fn zero_radius_graph_hits_exact_duplicates_only() {
    let mut points = PointSet::new(2).unwrap();
    points.push(&[0.0, 0.0]).unwrap();
    points.push(&[0.0, 0.0]).unwrap();
    points.push(&[1.0, 1.0]).unwrap();

    let params = BuildParams {
        min_hub_size: 1,
        ..BuildParams::default()
    };
    let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();
    let graph = build_epsilon_graph(&tree, &points, &Euclidean, 0.0);

    assert_eq!(graph[0], vec![0, 1]);
    assert_eq!(graph[1], vec![0, 1]);
    assert_eq!(graph[2], vec![2]);
}
