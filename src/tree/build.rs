//! Cover-tree construction and radius queries.
//!
//! # Algorithm
//!
//! Construction drives hubs through refinement in two parallelism modes:
//!
//! - **Level-synchronous**: every active hub performs one add-center step
//!   per round. The step is three-phase: pick farthest candidates in
//!   parallel across hubs, commit the qualifying picks serially in queue
//!   order (the only tree mutation), reassign in parallel. Terminated hubs
//!   split and their children join the queue. Vertex ids are deterministic.
//! - **Task-parallel**: each hub runs refinement to completion as a
//!   recursively spawned task, with no barriers between hubs; tree appends
//!   are serialized by a single mutex.
//!
//! The builder stays level-synchronous while the mean candidate count over
//! active hubs exceeds `switch_size`; at or below it, the remaining hubs are
//! dispatched as tasks. Big hubs benefit from data parallelism inside the
//! candidate scans; the long tail of small hubs benefits from task
//! parallelism without barriers.
//!
//! # Radius queries
//!
//! Exact fixed-radius search descends from the root: a visited vertex whose
//! point lies within `r` of the query is a hit, and a child `c` is visited
//! when `d(q, p_c) <= r + radius(c)`. The cover-radius invariant makes the
//! pruning complete. A point may label several vertices along a nesting
//! chain, so hits are sort-deduplicated.

use std::sync::Mutex;

use log::debug;
use rayon::prelude::*;

use crate::error::{CoverError, Result};
use crate::metric::Metric;
use crate::points::PointSet;
use crate::tree::hub::Hub;
use crate::tree::insert::{Ball, InsertTree, VertexId};

/// Construction parameters, immutable per build.
#[derive(Clone, Copy, Debug)]
pub struct BuildParams {
    /// Hub split ratio in `(0, 1]`: a hub admits a new center only while
    /// some candidate lies beyond `split_ratio * hub_radius` of every
    /// committed center.
    pub split_ratio: f64,
    /// Mean-hub-size threshold for switching from level-synchronous rounds
    /// to per-subtree tasks.
    pub switch_size: f64,
    /// Hubs at or below this size skip refinement and become leaves.
    pub min_hub_size: usize,
    /// Start in level-synchronous mode; `false` is task-parallel throughout.
    pub level_synch: bool,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            split_ratio: 0.5,
            switch_size: 0.0,
            min_hub_size: 10,
            level_synch: true,
        }
    }
}

impl BuildParams {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.split_ratio > 0.0 && self.split_ratio <= 1.0) {
            return Err(CoverError::InvalidParameter(format!(
                "split_ratio must lie in (0, 1], got {}",
                self.split_ratio
            )));
        }
        if self.min_hub_size < 1 {
            return Err(CoverError::InvalidParameter(
                "min_hub_size must be at least 1".to_string(),
            ));
        }
        if self.switch_size.is_nan() || self.switch_size < 0.0 {
            return Err(CoverError::InvalidParameter(format!(
                "switch_size must be non-negative, got {}",
                self.switch_size
            )));
        }
        Ok(())
    }
}

/// A completed cover tree over a borrowed point set.
#[derive(Clone, Debug)]
pub struct CoverTree {
    pub(crate) verts: InsertTree,
}

struct TaskCtx<'p, M> {
    tree: Mutex<InsertTree>,
    points: &'p PointSet,
    metric: &'p M,
    params: BuildParams,
}

impl CoverTree {
    /// Build a cover tree over `points`.
    ///
    /// The root represents point 0; refinement proceeds per [`BuildParams`].
    pub fn build<M: Metric>(points: &PointSet, metric: &M, params: &BuildParams) -> Result<Self> {
        params.validate()?;
        if points.is_empty() {
            return Err(CoverError::EmptyIndex);
        }

        let mut tree = InsertTree::default();
        let root = tree.add_vertex(Ball { point: 0, radius: 0.0 }, None);

        let hub = Hub::seeded(root, (0..points.len()).collect(), points, metric);
        tree.set_radius(root, hub.radius());

        let mut seeds = Vec::new();
        if hub.len() >= 2 {
            if hub.collapses(params.min_hub_size) {
                hub.collapse(&mut tree);
            } else {
                seeds.push(hub);
            }
        }

        if params.level_synch {
            seeds = Self::level_synchronous(&mut tree, points, metric, params, seeds);
        }
        if !seeds.is_empty() {
            tree = Self::task_parallel(tree, points, metric, *params, seeds);
        }

        debug!(
            "built cover tree: {} vertices over {} points, {} levels",
            tree.num_vertices(),
            points.len(),
            tree.num_levels()
        );
        Ok(Self { verts: tree })
    }

    /// Run level-synchronous rounds until the queue drains or the mean hub
    /// size falls to `switch_size`; leftover hubs are returned for task
    /// dispatch.
    fn level_synchronous<M: Metric>(
        tree: &mut InsertTree,
        points: &PointSet,
        metric: &M,
        params: &BuildParams,
        mut active: Vec<Hub>,
    ) -> Vec<Hub> {
        let mut round = 0usize;
        while !active.is_empty() {
            let total: usize = active.iter().map(Hub::len).sum();
            let avg = total as f64 / active.len() as f64;
            if avg <= params.switch_size {
                debug!(
                    "round {round}: dispatching {} hubs as tasks (avg size {avg:.1})",
                    active.len()
                );
                return active;
            }

            let picks: Vec<Option<usize>> = active
                .par_iter()
                .map(|hub| hub.next_center(params.split_ratio))
                .collect();

            for (hub, pick) in active.iter_mut().zip(&picks) {
                if let Some(i) = *pick {
                    hub.commit_center(i, tree);
                }
            }

            active
                .par_iter_mut()
                .zip(picks.par_iter())
                .for_each(|(hub, pick)| {
                    if pick.is_some() {
                        hub.reassign(points, metric);
                    }
                });

            let prev = std::mem::take(&mut active);
            for (hub, pick) in prev.into_iter().zip(picks) {
                if pick.is_some() {
                    active.push(hub);
                } else {
                    active.extend(hub.split(tree, params.min_hub_size));
                }
            }

            round += 1;
            debug!("round {round}: {} active hubs, avg size {avg:.1}", active.len());
        }
        Vec::new()
    }

    /// Run every seed hub to completion as an independent task, recursively
    /// spawning its children. The tree mutex around appends is the sole
    /// contention point.
    fn task_parallel<M: Metric>(
        tree: InsertTree,
        points: &PointSet,
        metric: &M,
        params: BuildParams,
        seeds: Vec<Hub>,
    ) -> InsertTree {
        let ctx = TaskCtx {
            tree: Mutex::new(tree),
            points,
            metric,
            params,
        };
        rayon::scope(|scope| {
            let ctx = &ctx;
            for hub in seeds {
                scope.spawn(move |scope| refine_task(scope, ctx, hub));
            }
        });
        ctx.tree.into_inner().unwrap()
    }

    /// Number of tree vertices (a point may label more than one).
    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.verts.num_vertices()
    }

    /// Number of tree levels.
    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.verts.num_levels()
    }

    #[inline]
    #[must_use]
    pub fn ball(&self, vertex: VertexId) -> Ball {
        self.verts.ball(vertex)
    }

    #[inline]
    #[must_use]
    pub fn parent_of(&self, vertex: VertexId) -> Option<VertexId> {
        self.verts.parent_of(vertex)
    }

    #[inline]
    #[must_use]
    pub fn level_of(&self, vertex: VertexId) -> usize {
        self.verts.level_of(vertex)
    }

    #[inline]
    #[must_use]
    pub fn children_of(&self, vertex: VertexId) -> &[VertexId] {
        self.verts.children_of(vertex)
    }

    /// Every point id within `radius` of `q`, exactly, in ascending order.
    pub fn query<M: Metric>(
        &self,
        points: &PointSet,
        metric: &M,
        q: &[f64],
        radius: f64,
    ) -> Vec<usize> {
        let mut out = Vec::new();
        self.query_into(points, metric, q, radius, &mut out);
        out
    }

    /// As [`CoverTree::query`], reusing the output buffer.
    pub fn query_into<M: Metric>(
        &self,
        points: &PointSet,
        metric: &M,
        q: &[f64],
        radius: f64,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        if self.verts.is_empty() {
            return;
        }

        let root = self.verts.ball(0);
        let mut stack = vec![(0, metric.distance(q, points.point(root.point)))];
        while let Some((v, d)) = stack.pop() {
            if d <= radius {
                out.push(self.verts.ball(v).point);
            }
            for &c in self.verts.children_of(v) {
                let ball = self.verts.ball(c);
                let dc = metric.distance(q, points.point(ball.point));
                if dc <= radius + ball.radius {
                    stack.push((c, dc));
                }
            }
        }

        out.sort_unstable();
        out.dedup();
    }

    /// Structural correctness check: root at level 0, levels increment from
    /// the parent, every point labels at least one vertex, covering
    /// (`d(child, parent) <= radius(parent)`), and separation between the
    /// admitted children of any vertex (each later child farther from every
    /// earlier sibling than its own recorded radius, the sound post-hoc
    /// form of the admission separation). Collapse leaves were never
    /// admitted through the separation threshold and are exempt; every
    /// other child, leaf or not, is checked.
    pub fn is_correct<M: Metric>(&self, points: &PointSet, metric: &M) -> bool {
        let t = &self.verts;
        if t.is_empty() {
            return points.is_empty();
        }
        if t.level_of(0) != 0 || t.parent_of(0).is_some() {
            return false;
        }

        for v in 1..t.num_vertices() {
            let parent = match t.parent_of(v) {
                Some(p) => p,
                None => return false,
            };
            if parent >= v || t.level_of(v) != t.level_of(parent) + 1 {
                return false;
            }
            let d = metric.distance(
                points.point(t.ball(v).point),
                points.point(t.ball(parent).point),
            );
            if d > t.ball(parent).radius {
                return false;
            }
        }

        let mut labeled = vec![false; points.len()];
        for v in 0..t.num_vertices() {
            labeled[t.ball(v).point] = true;
        }
        if !labeled.iter().all(|&l| l) {
            return false;
        }

        for v in 0..t.num_vertices() {
            let admitted: Vec<VertexId> = t
                .children_of(v)
                .iter()
                .copied()
                .filter(|&c| !t.via_collapse(c))
                .collect();
            for (i, &u) in admitted.iter().enumerate() {
                for &w in &admitted[i + 1..] {
                    let d = metric.distance(
                        points.point(t.ball(u).point),
                        points.point(t.ball(w).point),
                    );
                    if d <= t.ball(w).radius {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// True when the vertex is a collapse leaf rather than an admitted
    /// center.
    #[inline]
    #[must_use]
    pub fn via_collapse(&self, vertex: VertexId) -> bool {
        self.verts.via_collapse(vertex)
    }
}

fn refine_task<'p, 'scope, M: Metric>(
    scope: &rayon::Scope<'scope>,
    ctx: &'scope TaskCtx<'p, M>,
    mut hub: Hub,
) where
    'p: 'scope,
{
    while let Some(pick) = hub.next_center(ctx.params.split_ratio) {
        {
            let mut tree = ctx.tree.lock().unwrap();
            hub.commit_center(pick, &mut tree);
        }
        hub.reassign(ctx.points, ctx.metric);
    }

    let children = {
        let mut tree = ctx.tree.lock().unwrap();
        hub.split(&mut tree, ctx.params.min_hub_size)
    };
    for child in children {
        scope.spawn(move |scope| refine_task(scope, ctx, child));
    }
}
