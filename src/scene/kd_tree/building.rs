use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use crate::geometry::{Aabb, FloatType};
use crate::scene::source::{PrimitiveSource, SplitSide};

use super::{KdTree, NodeIdx, PackedNode, PrimListIdx};

/// Tuning knobs of the surface area heuristic builder.
#[derive(Clone, Debug, bon::Builder)]
pub struct BuildConfig {
    /// Estimated cost of one primitive intersection test, relative to
    /// `traversal_cost`
    #[builder(default = 80.0)]
    pub intersection_cost: FloatType,

    #[builder(default = 1.0)]
    pub traversal_cost: FloatType,

    /// Cost discount for splits that cut off empty space, in `0..=1`
    #[builder(default = 0.5)]
    pub empty_bonus: FloatType,

    /// Hard depth limit; `None` derives the limit from the primitive count
    pub max_depth: Option<u32>,

    /// Nodes with at most this many primitives become leaves without
    /// evaluating any split
    #[builder(default = 1)]
    pub leaf_primitive_limit: usize,

    /// Take the first axis that produces any usable split instead of
    /// evaluating all three. Faster builds, marginally worse trees.
    #[builder(default = true)]
    pub stop_at_first_axis: bool,

    /// Re-clip primitives against each chosen splitting plane. Makes the
    /// effective bounds tighter at the cost of a geometric clip per
    /// primitive and split.
    #[builder(default = false)]
    pub split_clipping: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig::builder().build()
    }
}

fn default_max_depth(primitive_count: usize) -> u32 {
    (8.0 + 1.3 * (primitive_count.max(1) as FloatType).log2()).round() as u32
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EdgeKind {
    Start,
    End,
}

/// One end of a candidate's extent projected onto the sweep axis.
#[derive(Copy, Clone, Debug)]
struct BoundEdge {
    position: FloatType,
    /// Index into the candidate list of the current node, not a source index
    prim: u32,
    kind: EdgeKind,
    /// The candidate has zero extent along the sweep axis, both of its edges
    /// share one position
    perpendicular: bool,
}

/// A primitive under consideration in some node, with bounds that may have
/// been tightened by clipping against the splitting planes above the node.
#[derive(Clone, Debug)]
struct Candidate {
    prim: u32,
    bounds: Aabb,
}

#[derive(Copy, Clone, Debug)]
struct SplitChoice {
    axis: usize,
    offset: usize,
    cost: FloatType,
}

struct TreeBuilder<'a, S: PrimitiveSource> {
    source: &'a S,
    config: &'a BuildConfig,
    nodes: IndexVec<NodeIdx, PackedNode>,
    prim_indices: IndexVec<PrimListIdx, u32>,
    edges: [Vec<BoundEdge>; 3],
}

impl KdTree {
    pub fn build<S: PrimitiveSource>(source: &S, config: &BuildConfig) -> KdTree {
        let mut bounds = Aabb::empty();
        let mut candidates = Vec::with_capacity(source.len());
        for prim in 0..source.len() {
            let prim_bounds = source.bounds(prim);
            bounds = bounds.union(&prim_bounds);
            candidates.push(Candidate {
                prim: prim as u32,
                bounds: prim_bounds,
            });
        }

        let max_depth = config
            .max_depth
            .unwrap_or_else(|| default_max_depth(source.len()));

        let mut builder = TreeBuilder {
            source,
            config,
            nodes: IndexVec::new(),
            prim_indices: IndexVec::new(),
            edges: Default::default(),
        };
        builder.build_recursive(candidates, &bounds, max_depth);

        KdTree {
            nodes: builder.nodes,
            prim_indices: builder.prim_indices,
            bounds,
            source_hash: source.content_hash(),
        }
    }
}

impl<S: PrimitiveSource> TreeBuilder<'_, S> {
    fn build_recursive(
        &mut self,
        candidates: Vec<Candidate>,
        node_bounds: &Aabb,
        depth_remaining: u32,
    ) {
        if candidates.len() <= self.config.leaf_primitive_limit || depth_remaining == 0 {
            self.push_leaf(&candidates);
            return;
        }

        let Some(split) = self.find_split(&candidates, node_bounds) else {
            self.push_leaf(&candidates);
            return;
        };

        let edges = std::mem::take(&mut self.edges[split.axis]);
        let position = edges[split.offset].position;
        let (below_prims, above_prims) = partition_primitives(&edges, split.offset);
        self.edges[split.axis] = edges;

        let mut below_bounds = *node_bounds;
        below_bounds.max[split.axis] = position;
        let mut above_bounds = *node_bounds;
        above_bounds.min[split.axis] = position;

        let below = self.child_candidates(&candidates, &below_prims, split.axis, position, SplitSide::Below);
        let above = self.child_candidates(&candidates, &above_prims, split.axis, position, SplitSide::Above);

        // Placeholder interior node; patched once the below subtree is built
        // and the above child index is known.
        let node_index = self.nodes.push(PackedNode::default());

        debug_assert!(self.nodes.next_idx() == node_index + 1);
        self.build_recursive(below, &below_bounds, depth_remaining - 1);

        let above_index = self.nodes.next_idx();
        self.build_recursive(above, &above_bounds, depth_remaining - 1);

        self.nodes[node_index] = PackedNode::new_interior(split.axis, position, above_index);
    }

    fn push_leaf(&mut self, candidates: &[Candidate]) {
        let prims: Vec<u32> = candidates.iter().map(|c| c.prim).collect();
        let node = PackedNode::new_leaf(&prims, &mut self.prim_indices);
        self.nodes.push(node);
    }

    /// Finds the cheapest splitting plane, or `None` when leaving the node as
    /// a leaf is cheaper than any split.
    fn find_split(&mut self, candidates: &[Candidate], node_bounds: &Aabb) -> Option<SplitChoice> {
        let leaf_cost = self.config.intersection_cost * candidates.len() as FloatType;

        let mut best: Option<SplitChoice> = None;
        let first_axis = node_bounds.longest_axis();
        for i in 0..3 {
            let axis = (first_axis + i) % 3;

            let mut edges = std::mem::take(&mut self.edges[axis]);
            fill_edges(&mut edges, axis, candidates);
            let swept = sweep_axis(&edges, axis, candidates.len(), node_bounds, self.config);
            self.edges[axis] = edges;

            if let Some((offset, cost)) = swept {
                if best.is_none_or(|b| cost < b.cost) {
                    best = Some(SplitChoice { axis, offset, cost });
                }
                if self.config.stop_at_first_axis {
                    break;
                }
            }
        }

        best.filter(|b| b.cost < leaf_cost)
    }

    fn child_candidates(
        &self,
        candidates: &[Candidate],
        kept: &[u32],
        axis: usize,
        split: FloatType,
        side: SplitSide,
    ) -> Vec<Candidate> {
        let mut ret = Vec::with_capacity(kept.len());
        for &local in kept {
            let candidate = &candidates[local as usize];
            let bounds = if self.config.split_clipping {
                let clipped = self.source.clip_bounds(
                    candidate.prim as usize,
                    &candidate.bounds,
                    axis,
                    split,
                    side,
                );
                if clipped.is_empty() {
                    // The actual geometry does not reach this side at all
                    continue;
                }
                clipped
            } else {
                candidate.bounds
            };
            ret.push(Candidate {
                prim: candidate.prim,
                bounds,
            });
        }
        ret
    }
}

fn fill_edges(edges: &mut Vec<BoundEdge>, axis: usize, candidates: &[Candidate]) {
    edges.clear();
    for (i, candidate) in candidates.iter().enumerate() {
        let low = candidate.bounds.min[axis];
        let high = candidate.bounds.max[axis];
        let perpendicular = low == high;
        edges.push(BoundEdge {
            position: low,
            prim: i as u32,
            kind: EdgeKind::Start,
            perpendicular,
        });
        edges.push(BoundEdge {
            position: high,
            prim: i as u32,
            kind: EdgeKind::End,
            perpendicular,
        });
    }
    // The tie-breaking tail of the key makes the order (and therefore the
    // built tree) fully deterministic even with coincident edge positions.
    edges.sort_by_key(|e| (OrderedFloat(e.position), e.kind, e.perpendicular, e.prim));
}

/// Sweeps the sorted edges of one axis and returns the offset and cost of the
/// cheapest usable plane. Planes on the node boundary would create an empty
/// child covering zero volume and are never considered.
fn sweep_axis(
    edges: &[BoundEdge],
    axis: usize,
    primitive_count: usize,
    node_bounds: &Aabb,
    config: &BuildConfig,
) -> Option<(usize, FloatType)> {
    let total_area = node_bounds.surface_area();
    if !(total_area > 0.0) {
        return None;
    }
    let inv_total_area = 1.0 / total_area;

    let d = node_bounds.size();
    let other0 = (axis + 1) % 3;
    let other1 = (axis + 2) % 3;
    let cap_area = d[other0] * d[other1];
    let rim = d[other0] + d[other1];

    let mut n_below = 0usize;
    let mut n_above = primitive_count;
    let mut best: Option<(usize, FloatType)> = None;

    for (offset, edge) in edges.iter().enumerate() {
        if edge.kind == EdgeKind::End {
            n_above -= 1;
        }

        let position = edge.position;
        if position > node_bounds.min[axis] && position < node_bounds.max[axis] {
            let area_below = 2.0 * (cap_area + (position - node_bounds.min[axis]) * rim);
            let area_above = 2.0 * (cap_area + (node_bounds.max[axis] - position) * rim);
            let p_below = area_below * inv_total_area;
            let p_above = area_above * inv_total_area;
            let bonus = if n_below == 0 || n_above == 0 {
                config.empty_bonus
            } else {
                0.0
            };
            let cost = config.traversal_cost
                + config.intersection_cost
                    * (1.0 - bonus)
                    * (p_below * n_below as FloatType + p_above * n_above as FloatType);

            if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                best = Some((offset, cost));
            }
        }

        if edge.kind == EdgeKind::Start {
            n_below += 1;
        }
    }

    best
}

/// Classifies candidates by the chosen edge offset: everything that starts
/// before the plane goes below, everything that ends after it goes above.
/// A straddling candidate lands in both lists. A zero extent candidate lying
/// exactly on the plane lands on exactly one side, decided by whether the
/// chosen offset points at its start or its end edge.
fn partition_primitives(edges: &[BoundEdge], best_offset: usize) -> (Vec<u32>, Vec<u32>) {
    let mut below = Vec::new();
    let mut above = Vec::new();
    for (i, edge) in edges.iter().enumerate() {
        if edge.kind == EdgeKind::Start && i < best_offset {
            below.push(edge.prim);
        } else if edge.kind == EdgeKind::End && i > best_offset {
            above.push(edge.prim);
        }
    }
    (below, above)
}
