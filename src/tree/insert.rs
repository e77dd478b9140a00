//! Append-only insertion tree.
//!
//! The skeletal structure the construction writes into: parallel arrays
//! keyed by an integer vertex id. Vertices are only ever appended, ids and
//! parent links are immutable once assigned, and every non-root vertex has
//! `parent < id`. Appends are not thread-safe; callers serialize them.

use smallvec::SmallVec;

/// Stable vertex identifier, assigned by insertion order (root = 0).
pub type VertexId = usize;

/// Per-vertex payload: which input point the vertex represents and an upper
/// bound on the distance from that point to any point in the subtree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ball {
    pub point: usize,
    pub radius: f64,
}

/// Append-only parent/children/level table.
#[derive(Clone, Debug, Default)]
pub struct InsertTree {
    balls: Vec<Ball>,
    parents: Vec<Option<VertexId>>,
    levels: Vec<usize>,
    children: Vec<SmallVec<[VertexId; 4]>>,
    collapsed: Vec<bool>,
    nlevels: usize,
}

impl InsertTree {
    /// Append a vertex. With no parent the vertex sits at level 0 and is not
    /// recorded as anyone's child; otherwise it is appended to the parent's
    /// child list at `level(parent) + 1`. Returns the new id.
    pub fn add_vertex(&mut self, ball: Ball, parent: Option<VertexId>) -> VertexId {
        self.append(ball, parent, false)
    }

    /// Append a radius-0 leaf produced by a hub collapse. Collapse leaves
    /// were never admitted through the separation threshold, and the
    /// correctness check exempts them from the sibling-separation test.
    pub fn add_collapse_leaf(&mut self, point: usize, parent: VertexId) -> VertexId {
        self.append(Ball { point, radius: 0.0 }, Some(parent), true)
    }

    fn append(&mut self, ball: Ball, parent: Option<VertexId>, collapsed: bool) -> VertexId {
        let vertex = self.balls.len();
        let level = match parent {
            Some(p) => {
                debug_assert!(p < vertex);
                self.children[p].push(vertex);
                self.levels[p] + 1
            }
            None => 0,
        };

        self.balls.push(ball);
        self.parents.push(parent);
        self.levels.push(level);
        self.children.push(SmallVec::new());
        self.collapsed.push(collapsed);
        self.nlevels = self.nlevels.max(level + 1);

        vertex
    }

    /// True when the vertex is a collapse leaf.
    #[inline]
    #[must_use]
    pub fn via_collapse(&self, vertex: VertexId) -> bool {
        self.collapsed[vertex]
    }

    /// Child ids of a vertex, in admission order.
    #[inline]
    #[must_use]
    pub fn children_of(&self, vertex: VertexId) -> &[VertexId] {
        &self.children[vertex]
    }

    #[inline]
    #[must_use]
    pub fn ball(&self, vertex: VertexId) -> Ball {
        self.balls[vertex]
    }

    #[inline]
    #[must_use]
    pub fn parent_of(&self, vertex: VertexId) -> Option<VertexId> {
        self.parents[vertex]
    }

    #[inline]
    #[must_use]
    pub fn level_of(&self, vertex: VertexId) -> usize {
        self.levels[vertex]
    }

    /// Record a vertex's cover radius. Written once, at split time.
    #[inline]
    pub fn set_radius(&mut self, vertex: VertexId, radius: f64) {
        self.balls[vertex].radius = radius;
    }

    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.balls.len()
    }

    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.nlevels
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.balls.is_empty()
    }

    pub fn clear(&mut self) {
        self.balls.clear();
        self.parents.clear();
        self.levels.clear();
        self.children.clear();
        self.collapsed.clear();
        self.nlevels = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball(point: usize) -> Ball {
        Ball { point, radius: 0.0 }
    }

    #[test]
    fn root_sits_at_level_zero() {
        let mut tree = InsertTree::default();
        let root = tree.add_vertex(ball(7), None);
        assert_eq!(root, 0);
        assert_eq!(tree.level_of(root), 0);
        assert_eq!(tree.parent_of(root), None);
        assert_eq!(tree.num_levels(), 1);
    }

    #[test]
    fn children_recorded_in_admission_order() {
        let mut tree = InsertTree::default();
        let root = tree.add_vertex(ball(0), None);
        let a = tree.add_vertex(ball(1), Some(root));
        let b = tree.add_vertex(ball(2), Some(root));
        let c = tree.add_vertex(ball(3), Some(a));

        assert_eq!(tree.children_of(root), &[a, b]);
        assert_eq!(tree.children_of(a), &[c]);
        assert_eq!(tree.level_of(c), 2);
        assert_eq!(tree.num_levels(), 3);
        assert!(tree.parent_of(c).unwrap() < c);
    }

    #[test]
    fn collapse_leaves_are_marked() {
        let mut tree = InsertTree::default();
        let root = tree.add_vertex(ball(0), None);
        let center = tree.add_vertex(ball(1), Some(root));
        let leaf = tree.add_collapse_leaf(2, center);

        assert!(!tree.via_collapse(root));
        assert!(!tree.via_collapse(center));
        assert!(tree.via_collapse(leaf));
        assert_eq!(tree.ball(leaf), ball(2));
        assert_eq!(tree.level_of(leaf), 2);
        assert_eq!(tree.children_of(center), &[leaf]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut tree = InsertTree::default();
        let root = tree.add_vertex(ball(0), None);
        tree.add_vertex(ball(1), Some(root));
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.num_levels(), 0);
    }
}
