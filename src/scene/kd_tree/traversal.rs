use arrayvec::ArrayVec;

use crate::geometry::{FloatType, Ray};
use crate::scene::source::{PrimitiveHit, PrimitiveSource};

use super::{KdTree, LeafPrims, NodeIdx, NodeKind};

/// Upper bound on the number of deferred far children during one traversal.
/// The builder's automatic depth limit stays far below this even for meshes
/// with billions of primitives; traversal panics if a hand-configured deeper
/// tree overflows it.
pub const MAX_TRAVERSAL_DEPTH: usize = 64;

type Stack = ArrayVec<(NodeIdx, FloatType, FloatType), MAX_TRAVERSAL_DEPTH>;

impl KdTree {
    /// Closest hit query. Updates `best` in place and returns true if
    /// anything closer than the incoming `best.t` was hit.
    ///
    /// Children are visited strictly front to back, so whole subtrees behind
    /// an already found hit get pruned, both when popped from the deferred
    /// stack and when the current interval starts behind the hit.
    pub fn intersect<S: PrimitiveSource>(
        &self,
        source: &S,
        ray: &Ray,
        best: &mut PrimitiveHit,
    ) -> bool {
        let Some((mut t_min, mut t_max)) = self.bounds.intersect_ray_guarded(ray) else {
            return false;
        };

        let mut found = false;
        let mut stack = Stack::new();
        let mut node = NodeIdx::from_usize(0);

        'traversal: loop {
            if t_min >= best.t {
                break;
            }

            match self.nodes[node].decode() {
                NodeKind::Interior {
                    axis,
                    split,
                    above_child,
                } => {
                    let origin = ray.origin[axis];
                    let direction = ray.direction[axis];
                    let below_child = node + 1;

                    if direction == 0.0 {
                        // The ray stays on one side of the plane for its whole
                        // length. Exactly on the plane it can graze primitives
                        // of both children; the above child gets a degenerate
                        // interval just to run its leaf tests.
                        if origin < split {
                            node = below_child;
                        } else if origin > split {
                            node = above_child;
                        } else {
                            stack.push((above_child, 0.0, 0.0));
                            node = below_child;
                        }
                        continue;
                    }

                    let t_plane = (split - origin) * ray.inv_direction[axis];
                    let below_first =
                        origin < split || (origin == split && direction <= 0.0);
                    let (near, far) = if below_first {
                        (below_child, above_child)
                    } else {
                        (above_child, below_child)
                    };

                    if t_plane > t_max || t_plane <= 0.0 {
                        node = near;
                    } else if t_plane < t_min {
                        node = far;
                    } else {
                        stack.push((far, t_plane, t_max));
                        node = near;
                        t_max = t_plane;
                    }
                }
                NodeKind::Leaf { prims } => {
                    match prims {
                        LeafPrims::None => {}
                        LeafPrims::Single(prim) => {
                            found |= source.intersect(ray, prim as usize, best);
                        }
                        LeafPrims::Range { offset, count } => {
                            for i in 0..count as usize {
                                let prim = self.prim_indices[offset + i];
                                found |= source.intersect(ray, prim as usize, best);
                            }
                        }
                    }

                    loop {
                        let Some((far, far_t_min, far_t_max)) = stack.pop() else {
                            break 'traversal;
                        };
                        if far_t_min >= best.t {
                            continue;
                        }
                        node = far;
                        t_min = far_t_min;
                        t_max = far_t_max;
                        break;
                    }
                }
            }
        }

        found
    }

    /// Occlusion query: is there any hit closer than `t_max`?
    /// Stops at the first hit instead of searching for the closest one.
    pub fn intersect_any<S: PrimitiveSource>(
        &self,
        source: &S,
        ray: &Ray,
        t_limit: FloatType,
    ) -> bool {
        let Some((t_min, t_max)) = self.bounds.intersect_ray_guarded(ray) else {
            return false;
        };
        if t_min > t_limit {
            return false;
        }
        let mut t_min = t_min;
        let mut t_max = t_max.min(t_limit);

        let mut stack = Stack::new();
        let mut node = NodeIdx::from_usize(0);

        'traversal: loop {
            match self.nodes[node].decode() {
                NodeKind::Interior {
                    axis,
                    split,
                    above_child,
                } => {
                    let origin = ray.origin[axis];
                    let direction = ray.direction[axis];
                    let below_child = node + 1;

                    if direction == 0.0 {
                        if origin < split {
                            node = below_child;
                        } else if origin > split {
                            node = above_child;
                        } else {
                            stack.push((above_child, 0.0, 0.0));
                            node = below_child;
                        }
                        continue;
                    }

                    let t_plane = (split - origin) * ray.inv_direction[axis];
                    let below_first =
                        origin < split || (origin == split && direction <= 0.0);
                    let (near, far) = if below_first {
                        (below_child, above_child)
                    } else {
                        (above_child, below_child)
                    };

                    if t_plane > t_max || t_plane <= 0.0 {
                        node = near;
                    } else if t_plane < t_min {
                        node = far;
                    } else {
                        stack.push((far, t_plane, t_max));
                        node = near;
                        t_max = t_plane;
                    }
                }
                NodeKind::Leaf { prims } => {
                    let any = match prims {
                        LeafPrims::None => false,
                        LeafPrims::Single(prim) => {
                            source.intersect_any(ray, prim as usize, t_limit)
                        }
                        LeafPrims::Range { offset, count } => (0..count as usize).any(|i| {
                            let prim = self.prim_indices[offset + i];
                            source.intersect_any(ray, prim as usize, t_limit)
                        }),
                    };
                    if any {
                        return true;
                    }

                    let Some((far, far_t_min, far_t_max)) = stack.pop() else {
                        break 'traversal;
                    };
                    node = far;
                    t_min = far_t_min;
                    t_max = far_t_max;
                }
            }
        }

        false
    }
}
