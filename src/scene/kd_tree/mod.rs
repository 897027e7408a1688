mod building;
mod persistence;
mod printing;
mod tiling;
mod traversal;

pub use building::BuildConfig;
pub use persistence::PersistenceError;
pub use tiling::{TiledTree, TilingError};
pub use traversal::MAX_TRAVERSAL_DEPTH;

use bytemuck::{Pod, Zeroable};
use index_vec::IndexVec;

use crate::geometry::{Aabb, FloatType};

/// Binary space partitioning tree over an abstract primitive source.
///
/// The tree stores nothing but split planes and primitive indices; leaf tests
/// go back through the `PrimitiveSource` it was built over. Nodes are stored
/// in depth-first order: the below child of an interior node is always the
/// next node in the array, only the above child is linked explicitly.
#[derive(Clone, Debug)]
pub struct KdTree {
    nodes: IndexVec<NodeIdx, PackedNode>,
    prim_indices: IndexVec<PrimListIdx, u32>,
    bounds: Aabb,
    source_hash: u64,
}

impl KdTree {
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Content hash of the source the tree was built over.
    pub fn source_hash(&self) -> u64 {
        self.source_hash
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn primitive_index_count(&self) -> usize {
        self.prim_indices.len()
    }
}

/// One node in 8 bytes.
///
/// The low two bits of the first word select the variant: values 0 to 2 mean
/// an interior node split along that axis, 3 means a leaf. For interior nodes
/// the rest of the first word is the above child index and the second word is
/// the split position as raw float bits. For leaves the rest of the first word
/// is the primitive count; the second word holds the primitive index directly
/// when the count is one, otherwise an offset into the overflow index list.
#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
struct PackedNode {
    word0: u32,
    word1: u32,
}

#[derive(Clone, Debug, PartialEq)]
enum NodeKind {
    Interior {
        axis: usize,
        split: FloatType,
        above_child: NodeIdx,
    },
    Leaf {
        prims: LeafPrims,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LeafPrims {
    None,
    Single(u32),
    Range { offset: PrimListIdx, count: u32 },
}

impl PackedNode {
    const VARIANT_BITS: u32 = 2;
    const VARIANT_MASK: u32 = (1 << Self::VARIANT_BITS) - 1;
    const LEAF_VARIANT: u32 = 3;

    pub const MAX_CHILD_INDEX: u32 = (u32::MAX >> Self::VARIANT_BITS) - 1;
    pub const MAX_LEAF_PRIMITIVES: u32 = u32::MAX >> Self::VARIANT_BITS;

    /// Create an interior node, panics if the axis or child index are out of range
    fn new_interior(axis: usize, split: FloatType, above_child: NodeIdx) -> Self {
        assert!(axis < 3);
        assert!(above_child.raw() <= Self::MAX_CHILD_INDEX);
        Self {
            word0: above_child.raw() << Self::VARIANT_BITS | axis as u32,
            word1: split.to_bits(),
        }
    }

    /// Create a leaf node, panics if there are too many primitives.
    /// Leaves with more than one primitive spill their indices into
    /// `prim_indices`, single-primitive leaves store the index inline.
    fn new_leaf(prims: &[u32], prim_indices: &mut IndexVec<PrimListIdx, u32>) -> Self {
        assert!(prims.len() as u64 <= Self::MAX_LEAF_PRIMITIVES as u64);
        let count = prims.len() as u32;

        let word1 = match prims {
            [] => 0,
            [single] => *single,
            many => {
                let offset = prim_indices.len_idx();
                prim_indices.extend(many.iter().copied());
                offset.raw()
            }
        };

        Self {
            word0: count << Self::VARIANT_BITS | Self::LEAF_VARIANT,
            word1,
        }
    }

    fn decode(&self) -> NodeKind {
        let variant = self.word0 & Self::VARIANT_MASK;
        if variant == Self::LEAF_VARIANT {
            let count = self.word0 >> Self::VARIANT_BITS;
            NodeKind::Leaf {
                prims: match count {
                    0 => LeafPrims::None,
                    1 => LeafPrims::Single(self.word1),
                    _ => LeafPrims::Range {
                        offset: PrimListIdx::from_raw_unchecked(self.word1),
                        count,
                    },
                },
            }
        } else {
            NodeKind::Interior {
                axis: variant as usize,
                split: FloatType::from_bits(self.word1),
                above_child: NodeIdx::from_raw_unchecked(self.word0 >> Self::VARIANT_BITS),
            }
        }
    }
}

impl std::fmt::Debug for PackedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedNode")
            .field("word0", &self.word0)
            .field("word1", &self.word1)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

index_vec::define_index_type! {
    struct NodeIdx = u32;
    MAX_INDEX = PackedNode::MAX_CHILD_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    struct PrimListIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};
    use test_strategy::proptest;

    #[proptest]
    fn packed_node_interior_roundtrip(
        #[strategy(0usize..3)] axis: usize,
        split: f32,
        #[strategy(0u32..=PackedNode::MAX_CHILD_INDEX)] above: u32,
    ) {
        let node = PackedNode::new_interior(axis, split, above.into());
        let_assert!(
            NodeKind::Interior {
                axis: decoded_axis,
                split: decoded_split,
                above_child,
            } = node.decode()
        );
        assert!(decoded_axis == axis);
        assert!(decoded_split.to_bits() == split.to_bits());
        assert!(above_child.raw() == above);
    }

    #[test]
    fn leaf_roundtrip_empty() {
        let mut indices = IndexVec::new();
        let node = PackedNode::new_leaf(&[], &mut indices);
        let_assert!(NodeKind::Leaf { prims } = node.decode());
        assert!(prims == LeafPrims::None);
        assert!(indices.is_empty());
    }

    #[proptest]
    fn leaf_roundtrip_single(prim: u32) {
        let mut indices = IndexVec::new();
        let node = PackedNode::new_leaf(&[prim], &mut indices);
        let_assert!(NodeKind::Leaf { prims } = node.decode());
        assert!(prims == LeafPrims::Single(prim));
        // Single primitive leaves never touch the overflow list
        assert!(indices.is_empty());
    }

    #[proptest]
    fn leaf_roundtrip_overflow(#[strategy(proptest::collection::vec(0u32.., 2..50))] prims: Vec<u32>) {
        let mut indices = IndexVec::new();
        indices.push(12345); // preexisting content must not shift
        let node = PackedNode::new_leaf(&prims, &mut indices);
        let_assert!(NodeKind::Leaf { prims: LeafPrims::Range { offset, count } } = node.decode());
        assert!(count as usize == prims.len());
        assert!(offset.raw() == 1);
        let stored: Vec<u32> = indices.iter().skip(1).copied().collect();
        assert!(stored == prims);
    }

    #[test]
    #[should_panic]
    fn interior_axis_out_of_range() {
        PackedNode::new_interior(3, 0.0, 0u32.into());
    }

    #[test]
    #[should_panic]
    fn interior_child_index_out_of_range() {
        PackedNode::new_interior(0, 0.0, NodeIdx::from_raw_unchecked(PackedNode::MAX_CHILD_INDEX + 1));
    }
}
