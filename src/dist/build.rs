//! Distributed cover-tree construction.
//!
//! Points are partitioned across ranks, each holding a contiguous slice at
//! a known global offset. The build has two phases:
//!
//! - **Phase A**: a replicated top tree over representative points. Each
//!   round, every rank contributes its locally farthest candidate per hub;
//!   a max-loc reduction picks the global farthest (ties: lowest rank, then
//!   lowest local id), an allgather ships the winner's coordinates, and
//!   every rank admits the same center into its replica. Reassignment is
//!   local.
//! - **Phase B**: once a hub is small enough (or the mean hub size falls
//!   under `switch_percent` percent of the point count), its candidate set
//!   becomes a ship unit. Units are assigned round-robin to owner ranks;
//!   the owner rebuilds the subtree with the shared-memory builder in its
//!   deterministic level-synchronous mode, and the resulting vertex
//!   metadata is merged into every replica.
//!
//! Queries for the epsilon graph run rank-locally against the full replica
//! (coordinates are allgathered after the build, standing in for the ghost
//! replication a production transport would do), and edge text is gathered
//! at rank 0.

use log::{debug, info};
use rayon::prelude::*;

use crate::dist::comm::Communicator;
use crate::error::{CoverError, Result};
use crate::graph::{self, EpsilonGraph};
use crate::metric::Metric;
use crate::points::PointSet;
use crate::tree::insert::{Ball, InsertTree, VertexId};
use crate::tree::{BuildParams, CoverTree};

/// Distributed build parameters, immutable per build.
#[derive(Clone, Copy, Debug)]
pub struct DistBuildParams {
    /// Hub split ratio in `(0, 1]`.
    pub split_ratio: f64,
    /// Phase switch threshold: mean hub size as a percentage of the global
    /// point count, in `[0, 100]`.
    pub switch_percent: f64,
    /// Hubs at or below this global size ship immediately.
    pub min_hub_size: usize,
}

impl Default for DistBuildParams {
    fn default() -> Self {
        Self {
            split_ratio: 0.5,
            switch_percent: 100.0,
            min_hub_size: 10,
        }
    }
}

impl DistBuildParams {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.split_ratio > 0.0 && self.split_ratio <= 1.0) {
            return Err(CoverError::InvalidParameter(format!(
                "split_ratio must lie in (0, 1], got {}",
                self.split_ratio
            )));
        }
        if !(0.0..=100.0).contains(&self.switch_percent) {
            return Err(CoverError::InvalidParameter(format!(
                "switch_percent must lie in [0, 100], got {}",
                self.switch_percent
            )));
        }
        if self.min_hub_size < 1 {
            return Err(CoverError::InvalidParameter(
                "min_hub_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct DistCenter {
    /// Global id of the center's point.
    point: usize,
    vertex: VertexId,
}

/// A hub whose candidate set spans ranks. The center list, radius, and
/// global count are replicated; candidates, assignments, and distances are
/// rank-local.
struct DistHub {
    parent: VertexId,
    radius: f64,
    total: usize,
    cands: Vec<usize>,
    assign: Vec<u32>,
    dist: Vec<f64>,
    centers: Vec<DistCenter>,
}

impl DistHub {
    /// Locally farthest candidate as `(distance, global id)`; ties go to
    /// the lower local id. A rank with no candidates contributes `-inf`.
    fn local_farthest(&self, myoffset: usize) -> (f64, u64) {
        let mut best = (f64::NEG_INFINITY, u64::MAX);
        for (i, &d) in self.dist.iter().enumerate() {
            let gid = (myoffset + self.cands[i]) as u64;
            if d > best.0 || (d == best.0 && gid < best.1) {
                best = (d, gid);
            }
        }
        best
    }

    /// Fold the newest center into the local assignment. Strict comparison
    /// keeps the lower center index on ties.
    fn reassign<M: Metric>(&mut self, mypoints: &PointSet, metric: &M, center: &[f64]) {
        let idx = (self.centers.len() - 1) as u32;
        for ((&p, d), a) in self
            .cands
            .iter()
            .zip(self.dist.iter_mut())
            .zip(self.assign.iter_mut())
        {
            let nd = metric.distance(mypoints.point(p), center);
            if nd < *d {
                *d = nd;
                *a = idx;
            }
        }
    }
}

/// A terminated hub group destined for an owner rank: the center vertex it
/// hangs under plus this rank's share of its candidates.
struct ShipUnit {
    parent: VertexId,
    center_gid: usize,
    members: Vec<usize>,
}

/// The result of a distributed build: a full tree replica plus this rank's
/// slice bookkeeping.
pub struct DistCoverTree {
    tree: CoverTree,
    allpoints: PointSet,
    myoffset: usize,
    mysize: usize,
    totsize: usize,
}

impl DistCoverTree {
    /// Cooperatively build the tree over every rank's slice. All ranks must
    /// call this with the same parameters; the returned replicas agree.
    pub fn build<C: Communicator, M: Metric>(
        mypoints: &PointSet,
        comm: &C,
        metric: &M,
        params: &DistBuildParams,
    ) -> Result<Self> {
        params.validate()?;

        let nranks = comm.size();
        let mysize = mypoints.len();
        let dim = mypoints.dim();

        let sizes: Vec<usize> = comm
            .allgather((mysize as u64).to_le_bytes().to_vec())
            .iter()
            .map(|b| read_u64(b, &mut 0) as usize)
            .collect();
        let totsize: usize = sizes.iter().sum();
        let myoffset: usize = sizes[..comm.rank()].iter().sum();
        if totsize == 0 {
            return Err(CoverError::EmptyIndex);
        }

        let mut tree = InsertTree::default();
        let mut reps = PointSet::new(dim)?;

        // Global point 0 seeds the root.
        let root_owner = sizes
            .iter()
            .position(|&s| s > 0)
            .expect("nonzero total size");
        let mut buf = Vec::new();
        if comm.rank() == root_owner {
            mypoints.pack_point(0, &mut buf);
        }
        let root_coords = comm.broadcast(root_owner, buf);
        reps.push_packed(&root_coords)?;
        let root = tree.add_vertex(Ball { point: 0, radius: 0.0 }, None);

        let cands: Vec<usize> = (0..mysize).collect();
        let dist: Vec<f64> = cands
            .par_iter()
            .map(|&p| metric.distance(mypoints.point(p), reps.point(0)))
            .collect();
        let local_max = dist.iter().copied().fold(0.0_f64, f64::max);
        let radius = comm.max_f64(local_max).max(0.0);
        tree.set_radius(root, radius);

        let assign = vec![0u32; mysize];
        let root_hub = DistHub {
            parent: root,
            radius,
            total: totsize,
            cands,
            assign,
            dist,
            centers: vec![DistCenter { point: 0, vertex: root }],
        };

        let mut hubs: Vec<DistHub> = Vec::new();
        let mut units: Vec<ShipUnit> = Vec::new();
        if totsize >= 2 {
            if radius <= 0.0 || totsize <= params.min_hub_size {
                units.push(ShipUnit {
                    parent: root,
                    center_gid: 0,
                    members: root_hub.cands,
                });
            } else {
                hubs.push(root_hub);
            }
        }

        // Phase A: replicated refinement rounds.
        let mut round = 0usize;
        while !hubs.is_empty() {
            let total: usize = hubs.iter().map(|h| h.total).sum();
            let avg = total as f64 / hubs.len() as f64;
            if 100.0 * avg / (totsize as f64) < params.switch_percent {
                if comm.rank() == 0 {
                    debug!(
                        "round {round}: shipping {} hubs (avg size {avg:.1})",
                        hubs.len()
                    );
                }
                let force = std::mem::take(&mut hubs);
                split_hubs(force, comm, &mut tree, params, true, &mut hubs, &mut units);
                debug_assert!(hubs.is_empty());
                break;
            }
            round += 1;

            // Collective max-loc per hub: the global farthest candidate,
            // ties to the lowest rank then the lowest local id (each rank's
            // contribution already resolves its own ties).
            let mut winners: Vec<Option<(usize, u64)>> = Vec::with_capacity(hubs.len());
            for hub in &hubs {
                let (d, gid) = hub.local_farthest(myoffset);
                let (best, loc) = comm.max_loc(d, gid);
                winners.push(
                    (best > params.split_ratio * hub.radius)
                        .then(|| (owner_of(&sizes, loc as usize), loc)),
                );
            }

            // An allgather ships the winning coordinates.
            let any_winner = winners.iter().any(Option::is_some);
            if any_winner {
                let mut blob = Vec::new();
                for winner in winners.iter().flatten() {
                    if winner.0 == comm.rank() {
                        mypoints.pack_point(winner.1 as usize - myoffset, &mut blob);
                    }
                }
                let coords = comm.allgather(blob);
                let mut cursors = vec![0usize; nranks];
                let width = dim * 8;

                for (hub, winner) in hubs.iter_mut().zip(&winners) {
                    let Some((rank, gid)) = *winner else { continue };
                    let at = cursors[rank];
                    cursors[rank] += width;
                    let rep = reps.len();
                    reps.push_packed(&coords[rank][at..at + width])?;

                    let vertex = tree.add_vertex(
                        Ball {
                            point: gid as usize,
                            radius: 0.0,
                        },
                        Some(hub.parent),
                    );
                    hub.centers.push(DistCenter {
                        point: gid as usize,
                        vertex,
                    });
                    hub.reassign(mypoints, metric, reps.point(rep));
                }
            }

            // Hubs whose winner no longer qualifies split now.
            let prev = std::mem::take(&mut hubs);
            let mut done = Vec::new();
            for (hub, winner) in prev.into_iter().zip(&winners) {
                if winner.is_some() {
                    hubs.push(hub);
                } else {
                    done.push(hub);
                }
            }
            split_hubs(done, comm, &mut tree, params, false, &mut hubs, &mut units);

            if comm.rank() == 0 {
                debug!("round {round}: {} active hubs, avg size {avg:.1}", hubs.len());
            }
        }

        if comm.rank() == 0 {
            info!(
                "top tree: {} vertices, {} ship units after {round} rounds",
                tree.num_vertices(),
                units.len()
            );
        }

        // Phase B: ship units to owners, build subtrees, merge metadata.
        merge_shipped_subtrees(&units, comm, mypoints, metric, params, myoffset, dim, &mut tree)?;

        // Full coordinate replica for the query phase.
        let mut blob = Vec::with_capacity(mysize * dim * 8);
        for i in 0..mysize {
            mypoints.pack_point(i, &mut blob);
        }
        let all = comm.allgather(blob);
        let mut allpoints = PointSet::new(dim)?;
        for rank_blob in &all {
            for chunk in rank_blob.chunks_exact(dim * 8) {
                allpoints.push_packed(chunk)?;
            }
        }

        if comm.rank() == 0 {
            info!(
                "distributed cover tree: {} vertices over {} points, {} levels",
                tree.num_vertices(),
                totsize,
                tree.num_levels()
            );
        }

        Ok(Self {
            tree: CoverTree { verts: tree },
            allpoints,
            myoffset,
            mysize,
            totsize,
        })
    }

    /// Neighbor lists for this rank's owned points (global ids), plus the
    /// global edge count.
    pub fn build_epsilon_graph<C: Communicator, M: Metric>(
        &self,
        comm: &C,
        metric: &M,
        radius: f64,
    ) -> (EpsilonGraph, usize) {
        let mygraph: EpsilonGraph = (0..self.mysize)
            .into_par_iter()
            .map(|i| {
                self.tree.query(
                    &self.allpoints,
                    metric,
                    self.allpoints.point(self.myoffset + i),
                    radius,
                )
            })
            .collect();
        let edges = comm.sum_u64(graph::num_edges(&mygraph) as u64) as usize;
        (mygraph, edges)
    }

    /// Gather every rank's edge lines at `root` (None elsewhere).
    pub fn gather_graph_lines<C: Communicator>(
        &self,
        comm: &C,
        mygraph: &EpsilonGraph,
        root: usize,
    ) -> Option<Vec<u8>> {
        let mine = graph::graph_lines(mygraph, self.myoffset);
        comm.gather(root, mine).map(|blobs| blobs.concat())
    }

    /// The merged tree replica.
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &CoverTree {
        &self.tree
    }

    /// The full coordinate replica, indexed by global point id.
    #[inline]
    #[must_use]
    pub fn points(&self) -> &PointSet {
        &self.allpoints
    }

    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.tree.num_vertices()
    }

    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.tree.num_levels()
    }

    #[inline]
    #[must_use]
    pub fn myoffset(&self) -> usize {
        self.myoffset
    }

    #[inline]
    #[must_use]
    pub fn totsize(&self) -> usize {
        self.totsize
    }
}

/// Split a batch of terminated hubs: one allgather carries per-center
/// `(local count, local max distance)`, then every rank applies identical
/// decisions. With `ship_all`, every surviving group becomes a ship unit.
fn split_hubs<C: Communicator>(
    done: Vec<DistHub>,
    comm: &C,
    tree: &mut InsertTree,
    params: &DistBuildParams,
    ship_all: bool,
    hubs: &mut Vec<DistHub>,
    units: &mut Vec<ShipUnit>,
) {
    if done.is_empty() {
        return;
    }

    let mut blob = Vec::new();
    let mut groups_per_hub = Vec::with_capacity(done.len());
    for hub in &done {
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); hub.centers.len()];
        for (i, &a) in hub.assign.iter().enumerate() {
            groups[a as usize].push(i);
        }
        for grp in &groups {
            let local_max = grp.iter().map(|&i| hub.dist[i]).fold(0.0_f64, f64::max);
            blob.extend_from_slice(&(grp.len() as u64).to_le_bytes());
            blob.extend_from_slice(&local_max.to_le_bytes());
        }
        groups_per_hub.push(groups);
    }
    let stats = comm.allgather(blob);

    let mut base = 0usize;
    for (hub, groups) in done.into_iter().zip(groups_per_hub) {
        for (ci, grp) in groups.into_iter().enumerate() {
            let mut count = 0usize;
            let mut radius = 0.0_f64;
            for rank_blob in &stats {
                let mut pos = (base + ci) * 16;
                count += read_u64(rank_blob, &mut pos) as usize;
                radius = radius.max(read_f64(rank_blob, &mut pos));
            }

            let center = hub.centers[ci];
            if ci > 0 {
                tree.set_radius(center.vertex, radius);
            }
            if count < 2 {
                continue;
            }

            let members: Vec<usize> = grp.iter().map(|&i| hub.cands[i]).collect();
            if ship_all || count <= params.min_hub_size || radius <= 0.0 {
                units.push(ShipUnit {
                    parent: center.vertex,
                    center_gid: center.point,
                    members,
                });
            } else {
                let dist: Vec<f64> = grp.iter().map(|&i| hub.dist[i]).collect();
                let assign = vec![0u32; members.len()];
                hubs.push(DistHub {
                    parent: center.vertex,
                    radius,
                    total: count,
                    cands: members,
                    assign,
                    dist,
                    centers: vec![DistCenter {
                        point: center.point,
                        vertex: center.vertex,
                    }],
                });
            }
        }
        base += hub.centers.len();
    }
}

/// Ship unit candidates to their owners, build each subtree locally, and
/// merge the allgathered vertex metadata into every replica.
#[allow(clippy::too_many_arguments)]
fn merge_shipped_subtrees<C: Communicator, M: Metric>(
    units: &[ShipUnit],
    comm: &C,
    mypoints: &PointSet,
    metric: &M,
    params: &DistBuildParams,
    myoffset: usize,
    dim: usize,
    tree: &mut InsertTree,
) -> Result<()> {
    let nranks = comm.size();
    let width = dim * 8;

    // Transfer: per unit, my member count then (gid, coords) records.
    let mut blob = Vec::new();
    for unit in units {
        blob.extend_from_slice(&(unit.members.len() as u64).to_le_bytes());
        for &li in &unit.members {
            blob.extend_from_slice(&((myoffset + li) as u64).to_le_bytes());
            mypoints.pack_point(li, &mut blob);
        }
    }
    let shipped = comm.allgather(blob);
    let mut cursors = vec![0usize; nranks];

    // Owners build; everyone advances cursors uniformly.
    let sub_params = BuildParams {
        split_ratio: params.split_ratio,
        switch_size: 0.0,
        min_hub_size: params.min_hub_size,
        level_synch: true,
    };
    let mut my_meta = Vec::new();
    for (u, unit) in units.iter().enumerate() {
        let owner = u % nranks;
        let mine = owner == comm.rank();

        let mut gids = Vec::new();
        let mut sub_points = PointSet::new(dim)?;
        let mut center_row: Option<usize> = None;
        for rank in 0..nranks {
            let rank_blob = &shipped[rank];
            let n = read_u64(rank_blob, &mut cursors[rank]) as usize;
            for _ in 0..n {
                let gid = read_u64(rank_blob, &mut cursors[rank]) as usize;
                let at = cursors[rank];
                cursors[rank] += width;
                if mine {
                    if gid == unit.center_gid {
                        center_row = Some(gids.len());
                    }
                    gids.push(gid);
                    sub_points.push_packed(&rank_blob[at..at + width])?;
                }
            }
        }

        if !mine {
            continue;
        }

        // The unit's center leads; the sub-build roots the hub at it.
        let center_row = center_row.expect("unit center among its members");
        if center_row != 0 {
            let mut reordered = PointSet::new(dim)?;
            let mut buf = Vec::new();
            sub_points.pack_point(center_row, &mut buf);
            reordered.push_packed(&buf)?;
            for row in 0..gids.len() {
                if row != center_row {
                    buf.clear();
                    sub_points.pack_point(row, &mut buf);
                    reordered.push_packed(&buf)?;
                }
            }
            let center_gid = gids.remove(center_row);
            gids.insert(0, center_gid);
            sub_points = reordered;
        }

        let sub = CoverTree::build(&sub_points, metric, &sub_params)?;

        // Vertex 0 maps onto the already-present center vertex; the rest is
        // appended verbatim, translated to global point ids.
        my_meta.extend_from_slice(&(u as u64).to_le_bytes());
        my_meta.extend_from_slice(&((sub.num_vertices() - 1) as u64).to_le_bytes());
        for v in 1..sub.num_vertices() {
            let ball = sub.ball(v);
            let parent = sub.parent_of(v).expect("non-root vertex has a parent");
            my_meta.extend_from_slice(&(parent as u64).to_le_bytes());
            my_meta.extend_from_slice(&(gids[ball.point] as u64).to_le_bytes());
            my_meta.extend_from_slice(&ball.radius.to_le_bytes());
            my_meta.push(u8::from(sub.via_collapse(v)));
        }
    }

    // Merge: every rank sees identical metadata and appends identically.
    let metas = comm.allgather(my_meta);
    let mut per_unit: Vec<Vec<(usize, usize, f64, bool)>> = vec![Vec::new(); units.len()];
    for rank_blob in &metas {
        let mut pos = 0usize;
        while pos < rank_blob.len() {
            let u = read_u64(rank_blob, &mut pos) as usize;
            let n = read_u64(rank_blob, &mut pos) as usize;
            let mut verts = Vec::with_capacity(n);
            for _ in 0..n {
                let parent = read_u64(rank_blob, &mut pos) as usize;
                let gid = read_u64(rank_blob, &mut pos) as usize;
                let radius = read_f64(rank_blob, &mut pos);
                let collapsed = read_u8(rank_blob, &mut pos) != 0;
                verts.push((parent, gid, radius, collapsed));
            }
            per_unit[u] = verts;
        }
    }

    for (unit, verts) in units.iter().zip(per_unit) {
        let mut vmap = vec![unit.parent];
        for (parent, gid, radius, collapsed) in verts {
            let v = if collapsed {
                tree.add_collapse_leaf(gid, vmap[parent])
            } else {
                tree.add_vertex(Ball { point: gid, radius }, Some(vmap[parent]))
            };
            vmap.push(v);
        }
    }

    Ok(())
}

/// Rank owning a global point id under the contiguous slice partition.
fn owner_of(sizes: &[usize], gid: usize) -> usize {
    let mut end = 0usize;
    for (rank, &s) in sizes.iter().enumerate() {
        end += s;
        if gid < end {
            return rank;
        }
    }
    panic!("global id {gid} outside the partition");
}

fn read_u8(buf: &[u8], pos: &mut usize) -> u8 {
    let b = buf[*pos];
    *pos += 1;
    b
}

fn read_u64(buf: &[u8], pos: &mut usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[*pos..*pos + 8]);
    *pos += 8;
    u64::from_le_bytes(raw)
}

fn read_f64(buf: &[u8], pos: &mut usize) -> f64 {
    f64::from_bits(read_u64(buf, pos))
}
