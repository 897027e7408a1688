use crate::util::Stats;

use super::{KdTree, LeafPrims, NodeIdx, NodeKind};

impl KdTree {
    pub fn print_statistics(&self) {
        let leaves = self.leaf_fill_statistics();
        println!(
            "Nodes: {} ({} leaves), overflow indices: {}",
            self.nodes.len(),
            leaves.count,
            self.prim_indices.len()
        );
        println!(
            "Leaf depth: {}",
            self.depth_statistics_recursive(NodeIdx::from_usize(0))
        );
        println!("Leaf fill: {}", leaves);
    }

    fn depth_statistics_recursive(&self, node: NodeIdx) -> Stats {
        match self.nodes[node].decode() {
            NodeKind::Leaf { .. } => Stats::new_single(1),
            NodeKind::Interior { above_child, .. } => {
                let mut ret = self
                    .depth_statistics_recursive(node + 1)
                    .merge(&self.depth_statistics_recursive(above_child));
                ret.min += 1;
                ret.max += 1;
                ret.sum += ret.count as u64;
                ret
            }
        }
    }

    fn leaf_fill_statistics(&self) -> Stats {
        let mut stats = Stats::default();
        stats.add_samples(self.nodes.iter().filter_map(|node| match node.decode() {
            NodeKind::Leaf { prims } => Some(match prims {
                LeafPrims::None => 0,
                LeafPrims::Single(_) => 1,
                LeafPrims::Range { count, .. } => count as usize,
            }),
            NodeKind::Interior { .. } => None,
        }));
        stats
    }

    pub fn print_tree(&self) {
        self.print_recursive(0, NodeIdx::from_usize(0));
    }

    fn print_recursive(&self, indent: usize, node: NodeIdx) {
        let prefix = "  ".repeat(indent);
        match self.nodes[node].decode() {
            NodeKind::Interior {
                axis,
                split,
                above_child,
            } => {
                println!("{}- I{}: axis {} at {}", prefix, node.raw(), axis, split);
                self.print_recursive(indent + 1, node + 1);
                self.print_recursive(indent + 1, above_child);
            }
            NodeKind::Leaf { prims } => {
                let prims: Vec<u32> = match prims {
                    LeafPrims::None => Vec::new(),
                    LeafPrims::Single(prim) => vec![prim],
                    LeafPrims::Range { offset, count } => (0..count as usize)
                        .map(|i| self.prim_indices[offset + i])
                        .collect(),
                };
                println!("{}- L{}: {:?}", prefix, node.raw(), prims);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;

    use crate::scene::kd_tree::BuildConfig;
    use crate::scene::mesh::TriangleMesh;
    use crate::scene::source::MeshSource;

    #[test]
    fn statistics_are_consistent() {
        let mesh = TriangleMesh::tessellated_sphere(1.0, 8, 5);
        let tree = KdTree::build(&MeshSource::new(&mesh), &BuildConfig::default());

        let depth = tree.depth_statistics_recursive(NodeIdx::from_usize(0));
        let fill = tree.leaf_fill_statistics();

        // A binary tree with n leaves has n - 1 interior nodes
        assert!(tree.node_count() == 2 * fill.count - 1);
        assert!(depth.count == fill.count);
        assert!(depth.min >= 1);
        assert!(depth.max as f64 >= depth.avg());
        assert!(fill.sum as usize >= mesh.len());
    }
}
