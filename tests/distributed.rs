//! Distributed build: replica agreement across ranks and graph correctness
//! against brute force, with the rank group run as threads over the
//! channel-mesh communicator.

use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use canopy::dist::{local_group, DistBuildParams, DistCoverTree};
use canopy::graph::EpsilonGraph;
use canopy::{Euclidean, Metric, PointSet};

fn uniform_points(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = PointSet::new(dim).unwrap();
    for _ in 0..n {
        let row: Vec<f64> = (0..dim).map(|_| rng.random::<f64>()).collect();
        points.push(&row).unwrap();
    }
    points
}

fn slices(points: &PointSet, nranks: usize) -> Vec<PointSet> {
    let base = points.len() / nranks;
    let rem = points.len() % nranks;
    let mut out = Vec::with_capacity(nranks);
    let mut offset = 0usize;
    for r in 0..nranks {
        let count = base + usize::from(r < rem);
        let mut slice = PointSet::new(points.dim()).unwrap();
        for id in offset..offset + count {
            slice.push(points.point(id)).unwrap();
        }
        offset += count;
        out.push(slice);
    }
    out
}

struct RankResult {
    shape: Vec<(usize, Option<usize>, usize)>,
    correct: bool,
    mygraph: EpsilonGraph,
    myoffset: usize,
    edges: usize,
}

/// Run the distributed build on `nranks` rank threads and collect each
/// rank's view.
fn run_dist(
    points: &PointSet,
    nranks: usize,
    params: &DistBuildParams,
    radius: f64,
) -> Vec<RankResult> {
    let parts = slices(points, nranks);
    let comms = local_group(nranks);

    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(&parts)
            .map(|(comm, mypoints)| {
                scope.spawn(move || {
                    let dtree =
                        DistCoverTree::build(mypoints, &comm, &Euclidean, params).unwrap();
                    let (mygraph, edges) = dtree.build_epsilon_graph(&comm, &Euclidean, radius);

                    let tree = dtree.tree();
                    let mut shape: Vec<_> = (0..tree.num_vertices())
                        .map(|v| {
                            (
                                tree.ball(v).point,
                                tree.parent_of(v).map(|p| tree.ball(p).point),
                                tree.level_of(v),
                            )
                        })
                        .collect();
                    shape.sort_unstable();

                    RankResult {
                        shape,
                        correct: tree.is_correct(dtree.points(), &Euclidean),
                        mygraph,
                        myoffset: dtree.myoffset(),
                        edges,
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn brute_graph(points: &PointSet, radius: f64) -> EpsilonGraph {
    (0..points.len())
        .map(|i| {
            (0..points.len())
                .filter(|&j| Euclidean.distance(points.point(i), points.point(j)) <= radius)
                .collect()
        })
        .collect()
}

fn check(points: &PointSet, nranks: usize, params: &DistBuildParams, radius: f64) {
    let results = run_dist(points, nranks, params, radius);

    for r in &results {
        assert!(r.correct, "replica fails the tree check");
        assert_eq!(r.shape, results[0].shape, "replicas disagree");
        assert_eq!(r.edges, results[0].edges);
    }

    let mut merged: EpsilonGraph = Vec::new();
    for r in &results {
        assert_eq!(r.myoffset, merged.len());
        merged.extend(r.mygraph.iter().cloned());
    }
    assert_eq!(merged, brute_graph(points, radius));
    assert_eq!(
        results[0].edges,
        merged.iter().map(Vec::len).sum::<usize>()
    );
}

#[test]
fn three_ranks_agree_and_match_brute_force() {
    let points = uniform_points(150, 3, 5);
    let params = DistBuildParams {
        min_hub_size: 4,
        switch_percent: 50.0,
        ..DistBuildParams::default()
    };
    check(&points, 3, &params, 0.3);
}

#[test]
fn zero_switch_percent_refines_fully_in_phase_a() {
    let points = uniform_points(90, 2, 6);
    let params = DistBuildParams {
        min_hub_size: 3,
        switch_percent: 0.0,
        ..DistBuildParams::default()
    };
    check(&points, 4, &params, 0.25);
}

#[test]
fn default_switch_ships_after_the_first_split() {
    let points = uniform_points(120, 2, 8);
    check(&points, 2, &DistBuildParams::default(), 0.2);
}

#[test]
fn more_ranks_than_points() {
    let points = uniform_points(3, 2, 10);
    let params = DistBuildParams {
        min_hub_size: 1,
        switch_percent: 0.0,
        ..DistBuildParams::default()
    };
    check(&points, 5, &params, 0.5);
}

#[test]
fn single_point_single_vertex() {
    let points = uniform_points(1, 2, 12);
    let results = run_dist(&points, 2, &DistBuildParams::default(), 0.5);
    for r in &results {
        assert_eq!(r.shape.len(), 1);
        assert!(r.correct);
    }
}

#[test]
fn duplicates_survive_distribution() {
    let mut points = PointSet::new(2).unwrap();
    points.push(&[0.0, 0.0]).unwrap();
    points.push(&[5.0, 5.0]).unwrap();
    points.push(&[5.0, 5.0]).unwrap();
    points.push(&[9.0, 0.0]).unwrap();
    let params = DistBuildParams {
        min_hub_size: 1,
        switch_percent: 0.0,
        ..DistBuildParams::default()
    };
    check(&points, 2, &params, 0.1);
}
