use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use index_vec::IndexVec;
use thiserror::Error;

use crate::geometry::Aabb;
use crate::scene::source::PrimitiveSource;

use super::{BuildConfig, KdTree, LeafPrims, NodeIdx, NodeKind, PackedNode, PrimListIdx};

/// File format: little endian `u32` node count, the nodes as pairs of `u32`
/// words, `u32` overflow index count, the overflow indices. Bounds and the
/// source hash are not stored, they are recomputed from the source on load.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed tree file: {0}")]
    Malformed(&'static str),
}

fn write_u32(writer: &mut impl Write, value: u32) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Path of the hash sidecar next to a cached tree file.
fn hash_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".hash");
    PathBuf::from(p)
}

impl KdTree {
    pub fn save(&self, writer: &mut impl Write) -> Result<(), PersistenceError> {
        write_u32(writer, self.nodes.len() as u32)?;
        for node in self.nodes.iter() {
            write_u32(writer, node.word0)?;
            write_u32(writer, node.word1)?;
        }
        write_u32(writer, self.prim_indices.len() as u32)?;
        for index in self.prim_indices.iter() {
            write_u32(writer, *index)?;
        }
        Ok(())
    }

    pub fn load<S: PrimitiveSource>(
        reader: &mut impl Read,
        source: &S,
    ) -> Result<KdTree, PersistenceError> {
        let node_count = read_u32(reader)?;
        if node_count == 0 {
            return Err(PersistenceError::Malformed("no nodes"));
        }
        let mut nodes: IndexVec<NodeIdx, PackedNode> = IndexVec::with_capacity(node_count as usize);
        for _ in 0..node_count {
            let word0 = read_u32(reader)?;
            let word1 = read_u32(reader)?;
            nodes.push(PackedNode { word0, word1 });
        }

        let index_count = read_u32(reader)?;
        let mut prim_indices: IndexVec<PrimListIdx, u32> =
            IndexVec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            prim_indices.push(read_u32(reader)?);
        }

        let primitive_count = source.len();
        for (index, node) in nodes.iter_enumerated() {
            match node.decode() {
                NodeKind::Interior { above_child, .. } => {
                    // The below child is implicitly the next node
                    if above_child.raw() >= node_count || index.raw() + 1 >= node_count {
                        return Err(PersistenceError::Malformed("child index out of range"));
                    }
                }
                NodeKind::Leaf { prims } => match prims {
                    LeafPrims::None => {}
                    LeafPrims::Single(prim) => {
                        if prim as usize >= primitive_count {
                            return Err(PersistenceError::Malformed(
                                "primitive index out of range",
                            ));
                        }
                    }
                    LeafPrims::Range { offset, count } => {
                        let end = offset.raw() as u64 + count as u64;
                        if end > index_count as u64 {
                            return Err(PersistenceError::Malformed(
                                "overflow list range out of range",
                            ));
                        }
                        for i in 0..count as usize {
                            if prim_indices[offset + i] as usize >= primitive_count {
                                return Err(PersistenceError::Malformed(
                                    "primitive index out of range",
                                ));
                            }
                        }
                    }
                },
            }
        }

        let mut bounds = Aabb::empty();
        for prim in 0..primitive_count {
            bounds = bounds.union(&source.bounds(prim));
        }

        Ok(KdTree {
            nodes,
            prim_indices,
            bounds,
            source_hash: source.content_hash(),
        })
    }

    /// Writes the tree file and a hash sidecar recording which source content
    /// it was built from.
    pub fn save_cached(&self, path: &Path) -> Result<(), PersistenceError> {
        let mut writer = BufWriter::new(fs::File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        fs::write(hash_path(path), self.source_hash.to_le_bytes())?;
        Ok(())
    }

    /// Loads the cached tree for `source`, or rebuilds and re-caches it.
    ///
    /// A missing or unreadable cache and a sidecar hash that does not match
    /// the current source content all mean the same thing: the cache does not
    /// exist for this geometry.
    pub fn load_cached<S: PrimitiveSource>(
        path: &Path,
        source: &S,
        config: &BuildConfig,
    ) -> Result<KdTree, PersistenceError> {
        if let Some(tree) = Self::try_load_cached(path, source) {
            return Ok(tree);
        }
        let tree = KdTree::build(source, config);
        tree.save_cached(path)?;
        Ok(tree)
    }

    fn try_load_cached<S: PrimitiveSource>(path: &Path, source: &S) -> Option<KdTree> {
        let recorded = fs::read(hash_path(path)).ok()?;
        let recorded = u64::from_le_bytes(recorded.try_into().ok()?);
        if recorded != source.content_hash() {
            return None;
        }

        let mut reader = BufReader::new(fs::File::open(path).ok()?);
        KdTree::load(&mut reader, source).ok()
    }
}
