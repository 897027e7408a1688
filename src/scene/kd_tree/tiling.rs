use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::geometry::{Aabb, FloatType, Ray};
use crate::scene::source::{PrimitiveHit, PrimitiveSource};

use super::traversal::MAX_TRAVERSAL_DEPTH;
use super::{KdTree, LeafPrims, NodeIdx, NodeKind, PrimListIdx};

/// Cache line sized repacking of a [`KdTree`].
///
/// Each record holds a complete depth 3 subtree of the flat tree, so one
/// cache line fetch serves up to three traversal steps. The flat tree stays
/// the build and persistence format; this is derived from it on demand.
#[derive(Clone, Debug)]
pub struct TiledTree {
    records: Vec<TiledRecord>,
    prim_indices: Vec<u32>,
    bounds: Aabb,
}

/// One 64 byte record.
///
/// The subtree inside is addressed by heap position: the subtree root is
/// position 1, children of position `p` are `2p` and `2p + 1`. Positions 1
/// to 7 are interior node storage (`splits` index `p - 1`), positions 8 to 15
/// are the bottom slots (`slots` index `p - 8`).
///
/// `layout` packs the split axes (two bits per interior position, starting at
/// bit 0) and a validity mask (one bit per interior position, starting at
/// bit 16). A clear validity bit means the subtree already ended above that
/// position; whatever the flat tree had there lives in the leftmost bottom
/// slot below the position instead.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct TiledRecord {
    splits: [FloatType; 7],
    layout: u32,
    slots: [u32; 8],
}

const _: () = assert!(std::mem::size_of::<TiledRecord>() == 64);

/// Bottom slot encoding: two tag bits, then the payload.
/// Leaves keep a five bit primitive count; one primitive is stored inline,
/// more than one as an offset into the overflow index list.
const SLOT_TAG_BITS: u32 = 2;
const SLOT_TAG_MASK: u32 = (1 << SLOT_TAG_BITS) - 1;
const SLOT_TAG_EMPTY: u32 = 0;
const SLOT_TAG_LEAF: u32 = 1;
const SLOT_TAG_RECORD: u32 = 2;

const SLOT_LEAF_COUNT_BITS: u32 = 5;
const SLOT_LEAF_COUNT_MASK: u32 = (1 << SLOT_LEAF_COUNT_BITS) - 1;

pub const MAX_SLOT_LEAF_PRIMITIVES: u32 = SLOT_LEAF_COUNT_MASK;
pub const MAX_SLOT_PAYLOAD: u32 = u32::MAX >> (SLOT_TAG_BITS + SLOT_LEAF_COUNT_BITS);
pub const MAX_RECORD_INDEX: u32 = (u32::MAX >> SLOT_TAG_BITS) - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Empty,
    Leaf(LeafPrims),
    Record(u32),
}

/// The slot encoding is narrower than the flat node encoding, so repacking
/// a valid tree can still fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TilingError {
    #[error("leaf with {count} primitives does not fit a bottom slot")]
    LeafTooLarge { count: u32 },

    #[error("primitive index {index} does not fit a bottom slot")]
    IndexOutOfRange { index: u32 },

    #[error("record count overflows the record link encoding")]
    TooManyRecords,
}

fn encode_leaf_slot(prims: LeafPrims) -> Result<u32, TilingError> {
    let (count, payload) = match prims {
        LeafPrims::None => (0, 0),
        LeafPrims::Single(prim) => (1, prim),
        LeafPrims::Range { offset, count } => (count, offset.raw()),
    };
    if count > MAX_SLOT_LEAF_PRIMITIVES {
        return Err(TilingError::LeafTooLarge { count });
    }
    if payload > MAX_SLOT_PAYLOAD {
        return Err(TilingError::IndexOutOfRange { index: payload });
    }
    Ok(payload << (SLOT_TAG_BITS + SLOT_LEAF_COUNT_BITS) | count << SLOT_TAG_BITS | SLOT_TAG_LEAF)
}

fn encode_record_slot(record: u32) -> Result<u32, TilingError> {
    if record > MAX_RECORD_INDEX {
        return Err(TilingError::TooManyRecords);
    }
    Ok(record << SLOT_TAG_BITS | SLOT_TAG_RECORD)
}

fn decode_slot(slot: u32) -> Slot {
    match slot & SLOT_TAG_MASK {
        SLOT_TAG_EMPTY => Slot::Empty,
        SLOT_TAG_LEAF => {
            let count = slot >> SLOT_TAG_BITS & SLOT_LEAF_COUNT_MASK;
            let payload = slot >> (SLOT_TAG_BITS + SLOT_LEAF_COUNT_BITS);
            Slot::Leaf(match count {
                0 => LeafPrims::None,
                1 => LeafPrims::Single(payload),
                _ => LeafPrims::Range {
                    offset: PrimListIdx::from_raw_unchecked(payload),
                    count,
                },
            })
        }
        SLOT_TAG_RECORD => Slot::Record(slot >> SLOT_TAG_BITS),
        _ => Slot::Empty,
    }
}

/// Bottom slot index reached by always descending below from `position`.
fn leftmost_slot(mut position: usize) -> usize {
    while position < 8 {
        position *= 2;
    }
    position - 8
}

struct TilingBuilder<'a> {
    tree: &'a KdTree,
    records: Vec<TiledRecord>,
}

impl TilingBuilder<'_> {
    fn pack_record(&mut self, root: NodeIdx) -> Result<u32, TilingError> {
        let index = self.records.len();
        if index as u64 > MAX_RECORD_INDEX as u64 {
            return Err(TilingError::TooManyRecords);
        }
        self.records.push(TiledRecord::zeroed());
        self.pack_position(root, index, 1)?;
        Ok(index as u32)
    }

    fn pack_position(
        &mut self,
        node: NodeIdx,
        record: usize,
        position: usize,
    ) -> Result<(), TilingError> {
        match self.tree.nodes[node].decode() {
            NodeKind::Interior {
                axis,
                split,
                above_child,
            } if position < 8 => {
                let r = &mut self.records[record];
                r.splits[position - 1] = split;
                r.layout |= (axis as u32) << (2 * (position - 1));
                r.layout |= 1 << (16 + (position - 1));

                self.pack_position(node + 1, record, 2 * position)?;
                self.pack_position(above_child, record, 2 * position + 1)?;
            }
            NodeKind::Interior { .. } => {
                // A subtree continuing past the bottom row spills into a
                // fresh record
                let child = self.pack_record(node)?;
                self.records[record].slots[position - 8] = encode_record_slot(child)?;
            }
            NodeKind::Leaf { prims } => {
                let slot = encode_leaf_slot(prims)?;
                self.records[record].slots[leftmost_slot(position)] = slot;
            }
        }
        Ok(())
    }
}

type Stack = ArrayVec<(usize, usize, FloatType, FloatType), MAX_TRAVERSAL_DEPTH>;

impl TiledTree {
    pub fn from_tree(tree: &KdTree) -> Result<TiledTree, TilingError> {
        let mut builder = TilingBuilder {
            tree,
            records: Vec::new(),
        };
        builder.pack_record(NodeIdx::from_usize(0))?;

        Ok(TiledTree {
            records: builder.records,
            prim_indices: tree.prim_indices.iter().copied().collect(),
            bounds: tree.bounds,
        })
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn interior_at(&self, record: usize, position: usize) -> Option<(usize, FloatType)> {
        if position >= 8 {
            return None;
        }
        let r = &self.records[record];
        if r.layout & (1 << (16 + (position - 1))) == 0 {
            return None;
        }
        let axis = (r.layout >> (2 * (position - 1)) & 3) as usize;
        Some((axis, r.splits[position - 1]))
    }

    fn slot_at(&self, record: usize, position: usize) -> Slot {
        let index = if position < 8 {
            leftmost_slot(position)
        } else {
            position - 8
        };
        decode_slot(self.records[record].slots[index])
    }

    /// Closest hit query, same contract and visit order as
    /// [`KdTree::intersect`].
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
        let mut record = 0;
        let mut position = 1;

        'traversal: loop {
            if t_min >= best.t {
                break;
            }

            if let Some((axis, split)) = self.interior_at(record, position) {
                let origin = ray.origin[axis];
                let direction = ray.direction[axis];
                let below = 2 * position;
                let above = 2 * position + 1;

                if direction == 0.0 {
                    if origin < split {
                        position = below;
                    } else if origin > split {
                        position = above;
                    } else {
                        stack.push((record, above, 0.0, 0.0));
                        position = below;
                    }
                    continue;
                }

                let t_plane = (split - origin) * ray.inv_direction[axis];
                let below_first = origin < split || (origin == split && direction <= 0.0);
                let (near, far) = if below_first { (below, above) } else { (above, below) };

                if t_plane > t_max || t_plane <= 0.0 {
                    position = near;
                } else if t_plane < t_min {
                    position = far;
                } else {
                    stack.push((record, far, t_plane, t_max));
                    position = near;
                    t_max = t_plane;
                }
                continue;
            }

            match self.slot_at(record, position) {
                Slot::Record(child) => {
                    record = child as usize;
                    position = 1;
                    continue;
                }
                Slot::Empty => {}
                Slot::Leaf(prims) => match prims {
                    LeafPrims::None => {}
                    LeafPrims::Single(prim) => {
                        found |= source.intersect(ray, prim as usize, best);
                    }
                    LeafPrims::Range { offset, count } => {
                        for i in 0..count as usize {
                            let prim = self.prim_indices[offset.raw() as usize + i];
                            found |= source.intersect(ray, prim as usize, best);
                        }
                    }
                },
            }

            loop {
                let Some((far_record, far_position, far_t_min, far_t_max)) = stack.pop() else {
                    break 'traversal;
                };
                if far_t_min >= best.t {
                    continue;
                }
                record = far_record;
                position = far_position;
                t_min = far_t_min;
                t_max = far_t_max;
                break;
            }
        }

        found
    }

    /// Occlusion query, same contract as [`KdTree::intersect_any`].
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
        let mut record = 0;
        let mut position = 1;

        'traversal: loop {
            if let Some((axis, split)) = self.interior_at(record, position) {
                let origin = ray.origin[axis];
                let direction = ray.direction[axis];
                let below = 2 * position;
                let above = 2 * position + 1;

                if direction == 0.0 {
                    if origin < split {
                        position = below;
                    } else if origin > split {
                        position = above;
                    } else {
                        stack.push((record, above, 0.0, 0.0));
                        position = below;
                    }
                    continue;
                }

                let t_plane = (split - origin) * ray.inv_direction[axis];
                let below_first = origin < split || (origin == split && direction <= 0.0);
                let (near, far) = if below_first { (below, above) } else { (above, below) };

                if t_plane > t_max || t_plane <= 0.0 {
                    position = near;
                } else if t_plane < t_min {
                    position = far;
                } else {
                    stack.push((record, far, t_plane, t_max));
                    position = near;
                    t_max = t_plane;
                }
                continue;
            }

            let any = match self.slot_at(record, position) {
                Slot::Record(child) => {
                    record = child as usize;
                    position = 1;
                    continue;
                }
                Slot::Empty => false,
                Slot::Leaf(prims) => match prims {
                    LeafPrims::None => false,
                    LeafPrims::Single(prim) => source.intersect_any(ray, prim as usize, t_limit),
                    LeafPrims::Range { offset, count } => (0..count as usize).any(|i| {
                        let prim = self.prim_indices[offset.raw() as usize + i];
                        source.intersect_any(ray, prim as usize, t_limit)
                    }),
                },
            };
            if any {
                return true;
            }

            let Some((far_record, far_position, far_t_min, far_t_max)) = stack.pop() else {
                break 'traversal;
            };
            record = far_record;
            position = far_position;
            t_min = far_t_min;
            t_max = far_t_max;
        }

        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};
    use test_strategy::proptest;

    use crate::geometry::test::RayWrapper;
    use crate::geometry::{WorldPoint, WorldVector};
    use crate::scene::kd_tree::BuildConfig;
    use crate::scene::mesh::TriangleMesh;
    use crate::scene::source::MeshSource;

    #[proptest]
    fn slot_roundtrip_single(#[strategy(0u32..=MAX_SLOT_PAYLOAD)] prim: u32) {
        let slot = encode_leaf_slot(LeafPrims::Single(prim)).unwrap();
        assert!(decode_slot(slot) == Slot::Leaf(LeafPrims::Single(prim)));
    }

    #[proptest]
    fn slot_roundtrip_range(
        #[strategy(0u32..=MAX_SLOT_PAYLOAD)] offset: u32,
        #[strategy(2u32..=MAX_SLOT_LEAF_PRIMITIVES)] count: u32,
    ) {
        let prims = LeafPrims::Range {
            offset: PrimListIdx::from_raw_unchecked(offset),
            count,
        };
        let slot = encode_leaf_slot(prims).unwrap();
        assert!(decode_slot(slot) == Slot::Leaf(prims));
    }

    #[proptest]
    fn slot_roundtrip_record(#[strategy(0u32..=MAX_RECORD_INDEX)] record: u32) {
        let slot = encode_record_slot(record).unwrap();
        assert!(decode_slot(slot) == Slot::Record(record));
    }

    #[test]
    fn slot_rejects_out_of_range() {
        let_assert!(
            Err(TilingError::LeafTooLarge { .. }) = encode_leaf_slot(LeafPrims::Range {
                offset: PrimListIdx::from_raw_unchecked(0),
                count: MAX_SLOT_LEAF_PRIMITIVES + 1,
            })
        );
        let_assert!(
            Err(TilingError::IndexOutOfRange { .. }) =
                encode_leaf_slot(LeafPrims::Single(MAX_SLOT_PAYLOAD + 1))
        );
        let_assert!(Err(TilingError::TooManyRecords) = encode_record_slot(MAX_RECORD_INDEX + 1));
    }

    #[test]
    fn zero_slot_is_empty() {
        assert!(decode_slot(0) == Slot::Empty);
    }

    #[test]
    fn oversized_leaf_fails_tiling() {
        // A single leaf with more primitives than a slot count can express
        let mesh = TriangleMesh::tessellated_sphere(1.0, 8, 5);
        assert!(mesh.len() > MAX_SLOT_LEAF_PRIMITIVES as usize);
        let config = BuildConfig::builder().max_depth(0).build();
        let tree = KdTree::build(&MeshSource::new(&mesh), &config);

        let_assert!(Err(TilingError::LeafTooLarge { .. }) = TiledTree::from_tree(&tree));
    }

    #[test]
    fn deep_tree_spills_into_multiple_records() {
        let mesh = TriangleMesh::tessellated_sphere(1.0, 16, 12);
        let tree = KdTree::build(&MeshSource::new(&mesh), &BuildConfig::default());
        let tiled = TiledTree::from_tree(&tree).unwrap();

        assert!(tiled.record_count() > 1);
        assert!(tiled.bounds() == tree.bounds());
    }

    #[test]
    fn hits_cube_face() {
        let mesh = TriangleMesh::cube(0.5);
        let source = MeshSource::new(&mesh);
        let tree = KdTree::build(&source, &BuildConfig::default());
        let tiled = TiledTree::from_tree(&tree).unwrap();

        let ray = Ray::new(
            WorldPoint::new(0.1, 0.1, 5.0),
            WorldVector::new(0.0, 0.0, -1.0),
        );
        let mut hit = PrimitiveHit::miss();
        assert!(tiled.intersect(&source, &ray, &mut hit));
        assert!((hit.t - 4.5).abs() < 1e-5);
        assert!(tiled.intersect_any(&source, &ray, 5.0));
        assert!(!tiled.intersect_any(&source, &ray, 4.0));
    }

    /// The repacked tree must answer every query exactly like the flat tree
    /// it came from.
    #[proptest]
    fn matches_flat_tree(ray: RayWrapper) {
        let mesh = TriangleMesh::tessellated_sphere(1.0, 8, 5);
        let source = MeshSource::new(&mesh);
        let config = BuildConfig::builder().leaf_primitive_limit(4).build();
        let tree = KdTree::build(&source, &config);
        let tiled = TiledTree::from_tree(&tree).unwrap();

        let mut flat_hit = PrimitiveHit::miss();
        let flat_found = tree.intersect(&source, &ray, &mut flat_hit);
        let mut tiled_hit = PrimitiveHit::miss();
        let tiled_found = tiled.intersect(&source, &ray, &mut tiled_hit);

        assert!(flat_found == tiled_found);
        if flat_found {
            assert!(flat_hit.t.to_bits() == tiled_hit.t.to_bits());
            assert!(flat_hit.prim == tiled_hit.prim);
        }

        assert!(
            tree.intersect_any(&source, &ray, 10.0) == tiled.intersect_any(&source, &ray, 10.0)
        );
    }
}
