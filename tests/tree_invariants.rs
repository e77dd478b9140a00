//! Property tests for the construction invariants: covering, separation,
//! completeness, level monotonicity, and equivalence across construction
//! modes and thread counts.

use proptest::prelude::*;

use canopy::{BuildParams, CoverTree, Euclidean, Metric, PointSet};

/// Id-stripped tree shape: sorted `(point, parent point, level)` triples.
/// Vertex ids may differ between modes; the shape must not.
fn shape(tree: &CoverTree) -> Vec<(usize, Option<usize>, usize)> {
    let mut triples: Vec<_> = (0..tree.num_vertices())
        .map(|v| {
            (
                tree.ball(v).point,
                tree.parent_of(v).map(|p| tree.ball(p).point),
                tree.level_of(v),
            )
        })
        .collect();
    triples.sort_unstable();
    triples
}

fn arb_points() -> impl Strategy<Value = (usize, Vec<f64>)> {
    (1usize..=3, 1usize..=60).prop_flat_map(|(dim, n)| {
        prop::collection::vec(-1.0f64..1.0, dim * n).prop_map(move |coords| (dim, coords))
    })
}

fn arb_params() -> impl Strategy<Value = (f64, usize)> {
    (0.2f64..=0.9, 1usize..=8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn built_trees_are_correct(
        (dim, coords) in arb_points(),
        (split_ratio, min_hub_size) in arb_params(),
    ) {
        let points = PointSet::from_flat(dim, coords).unwrap();
        let params = BuildParams {
            split_ratio,
            min_hub_size,
            ..BuildParams::default()
        };
        let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();
        prop_assert!(tree.is_correct(&points, &Euclidean));
        prop_assert!(tree.num_vertices() >= points.len());
    }

    #[test]
    fn level_sync_and_task_modes_agree(
        (dim, coords) in arb_points(),
        (split_ratio, min_hub_size) in arb_params(),
    ) {
        let points = PointSet::from_flat(dim, coords).unwrap();
        let base = BuildParams {
            split_ratio,
            min_hub_size,
            ..BuildParams::default()
        };

        let synchronous = CoverTree::build(&points, &Euclidean, &base).unwrap();
        let tasked = CoverTree::build(
            &points,
            &Euclidean,
            &BuildParams {
                level_synch: false,
                ..base
            },
        )
        .unwrap();

        prop_assert_eq!(shape(&synchronous), shape(&tasked));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn thread_count_does_not_change_the_shape(
        (dim, coords) in arb_points(),
    ) {
        let points = PointSet::from_flat(dim, coords).unwrap();
        let params = BuildParams {
            min_hub_size: 2,
            ..BuildParams::default()
        };

        let mut shapes = Vec::new();
        for nthreads in [1, 4] {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(nthreads)
                .build()
                .unwrap();
            for level_synch in [true, false] {
                let p = BuildParams { level_synch, ..params };
                let tree = pool
                    .install(|| CoverTree::build(&points, &Euclidean, &p))
                    .unwrap();
                shapes.push(shape(&tree));
            }
        }
        for s in &shapes[1..] {
            prop_assert_eq!(&shapes[0], s);
        }
    }

    #[test]
    fn queries_match_brute_force(
        (dim, coords) in arb_points(),
        radius in 0.0f64..1.5,
    ) {
        let points = PointSet::from_flat(dim, coords).unwrap();
        let params = BuildParams {
            min_hub_size: 3,
            ..BuildParams::default()
        };
        let tree = CoverTree::build(&points, &Euclidean, &params).unwrap();

        for id in 0..points.len() {
            let got = tree.query(&points, &Euclidean, points.point(id), radius);
            let want: Vec<usize> = (0..points.len())
                .filter(|&j| {
                    Euclidean.distance(points.point(id), points.point(j)) <= radius
                })
                .collect();
            prop_assert_eq!(&got, &want, "neighbors of point {}", id);
        }
    }
}
