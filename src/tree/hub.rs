//! Hub refinement.
//!
//! A hub is the working set of construction: a group of candidate points
//! being partitioned under a common parent vertex. Refinement repeatedly
//! admits the farthest candidate as a new center (a new child vertex of the
//! parent) and reassigns every candidate to its nearest center. The hub's
//! admission scale is its radius at creation; once no candidate lies beyond
//! `split_ratio * radius` of every center, the hub splits into one child hub
//! per center that attracted at least two points.
//!
//! The first center never appends a vertex: it is the parent vertex itself,
//! whose point is the hub's first candidate. Only admitted centers and
//! collapse leaves write to the tree.

use rayon::prelude::*;

use crate::metric::Metric;
use crate::points::PointSet;
use crate::tree::insert::{Ball, InsertTree, VertexId};

/// Candidate scans shorter than this stay serial.
const PAR_SCAN: usize = 2048;

#[derive(Clone, Copy, Debug)]
struct HubCenter {
    point: usize,
    vertex: VertexId,
}

/// A mutable work unit of tree construction.
#[derive(Clone, Debug)]
pub(crate) struct Hub {
    parent: VertexId,
    radius: f64,
    cands: Vec<usize>,
    assign: Vec<u32>,
    dist: Vec<f64>,
    centers: Vec<HubCenter>,
}

impl Hub {
    /// Seed a hub under `parent`, whose point must be `cands[0]`. Distances
    /// to the seed center are computed here; the radius is their maximum.
    pub(crate) fn seeded<M: Metric>(
        parent: VertexId,
        cands: Vec<usize>,
        points: &PointSet,
        metric: &M,
    ) -> Self {
        let center = points.point(cands[0]);
        let dist: Vec<f64> = if cands.len() >= PAR_SCAN {
            cands
                .par_iter()
                .map(|&p| metric.distance(points.point(p), center))
                .collect()
        } else {
            cands
                .iter()
                .map(|&p| metric.distance(points.point(p), center))
                .collect()
        };
        Self::from_parts(parent, cands, dist)
    }

    /// Rebuild a hub from candidates whose distances to `cands[0]` are
    /// already known (the split path: no distance is ever recomputed).
    fn from_parts(parent: VertexId, cands: Vec<usize>, dist: Vec<f64>) -> Self {
        debug_assert!(!cands.is_empty());
        debug_assert_eq!(cands.len(), dist.len());
        let radius = dist.iter().copied().fold(0.0_f64, f64::max);
        let assign = vec![0u32; cands.len()];
        let centers = vec![HubCenter {
            point: cands[0],
            vertex: parent,
        }];
        Self {
            parent,
            radius,
            cands,
            assign,
            dist,
            centers,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.cands.len()
    }

    #[inline]
    pub(crate) fn radius(&self) -> f64 {
        self.radius
    }

    /// The farthest candidate, qualified against the admission threshold.
    /// Ties go to the lower point id.
    pub(crate) fn next_center(&self, split_ratio: f64) -> Option<usize> {
        let (best, d) = self.farthest();
        (d > split_ratio * self.radius).then_some(best)
    }

    fn farthest(&self) -> (usize, f64) {
        let pick = |a: (usize, f64), b: (usize, f64)| {
            if a.0 == usize::MAX {
                return b;
            }
            if b.0 == usize::MAX {
                return a;
            }
            if b.1 > a.1 || (b.1 == a.1 && self.cands[b.0] < self.cands[a.0]) {
                b
            } else {
                a
            }
        };
        if self.dist.len() >= PAR_SCAN {
            self.dist
                .par_iter()
                .enumerate()
                .map(|(i, &d)| (i, d))
                .reduce(|| (usize::MAX, f64::NEG_INFINITY), pick)
        } else {
            self.dist
                .iter()
                .enumerate()
                .map(|(i, &d)| (i, d))
                .fold((usize::MAX, f64::NEG_INFINITY), pick)
        }
    }

    /// Commit a candidate as a new center: one vertex appended under the
    /// hub's parent. The caller serializes tree appends.
    pub(crate) fn commit_center(&mut self, cand_idx: usize, tree: &mut InsertTree) {
        let point = self.cands[cand_idx];
        let vertex = tree.add_vertex(Ball { point, radius: 0.0 }, Some(self.parent));
        self.centers.push(HubCenter { point, vertex });
    }

    /// Fold the newest center into the assignment: any candidate strictly
    /// closer to it moves over. Strict comparison keeps the lower center
    /// index on ties.
    pub(crate) fn reassign<M: Metric>(&mut self, points: &PointSet, metric: &M) {
        let idx = (self.centers.len() - 1) as u32;
        let center = points.point(self.centers[self.centers.len() - 1].point);
        if self.cands.len() >= PAR_SCAN {
            self.cands
                .par_iter()
                .zip(self.dist.par_iter_mut().zip(self.assign.par_iter_mut()))
                .for_each(|(&p, (d, a))| {
                    let nd = metric.distance(points.point(p), center);
                    if nd < *d {
                        *d = nd;
                        *a = idx;
                    }
                });
        } else {
            for ((&p, d), a) in self
                .cands
                .iter()
                .zip(self.dist.iter_mut())
                .zip(self.assign.iter_mut())
            {
                let nd = metric.distance(points.point(p), center);
                if nd < *d {
                    *d = nd;
                    *a = idx;
                }
            }
        }
    }

    /// True when the whole hub should turn into leaves instead of refining:
    /// at or below the minimum size, or all candidates coincide with the
    /// center.
    pub(crate) fn collapses(&self, min_hub_size: usize) -> bool {
        self.len() >= 2 && (self.len() <= min_hub_size || self.radius <= 0.0)
    }

    /// Commit every candidate as a radius-0 leaf child of the parent vertex.
    pub(crate) fn collapse(self, tree: &mut InsertTree) {
        for &p in &self.cands {
            tree.add_collapse_leaf(p, self.parent);
        }
    }

    /// Terminate refinement: group candidates by assignment, record cover
    /// radii for the admitted centers, and spawn child hubs for groups of
    /// two or more. Groups that would collapse do so here; singleton groups
    /// end at the center vertex itself. Returns the hubs that live on.
    pub(crate) fn split(self, tree: &mut InsertTree, min_hub_size: usize) -> Vec<Hub> {
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.centers.len()];
        for (i, &a) in self.assign.iter().enumerate() {
            groups[a as usize].push(i);
        }

        let mut live = Vec::new();
        for (ci, grp) in groups.into_iter().enumerate() {
            let center = self.centers[ci];
            let radius = grp.iter().map(|&i| self.dist[i]).fold(0.0_f64, f64::max);
            if ci > 0 {
                // Center 0 is the parent vertex; its radius was recorded when
                // this hub was created.
                tree.set_radius(center.vertex, radius);
            }
            if grp.len() < 2 {
                continue;
            }

            let mut cands = Vec::with_capacity(grp.len());
            let mut dist = Vec::with_capacity(grp.len());
            cands.push(center.point);
            dist.push(0.0);
            for &i in &grp {
                if self.cands[i] != center.point {
                    cands.push(self.cands[i]);
                    dist.push(self.dist[i]);
                }
            }

            let child = Hub::from_parts(center.vertex, cands, dist);
            if child.collapses(min_hub_size) {
                child.collapse(tree);
            } else {
                live.push(child);
            }
        }
        live
    }
}
