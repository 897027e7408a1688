pub mod kd_tree;
pub mod mesh;
pub mod source;

use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::geometry::{FloatType, Ray, WorldVector};
use kd_tree::{BuildConfig, KdTree, PersistenceError};
use mesh::TriangleMesh;
use source::{Instance, InstanceSource, MeshSource, PrimitiveHit, PrimitiveSource};

index_vec::define_index_type! {
    pub struct GeometryIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct InstanceIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

/// Meshes placed into the world by instances, with a k-d tree per mesh and a
/// k-d tree over the instances on top. Rays enter through the top level tree
/// and get transformed into instance space at each instance they reach.
#[derive(Clone)]
pub struct Scene {
    meshes: Vec<TriangleMesh>,
    trees: Vec<KdTree>,
    instances: Vec<Instance>,
    top_level: KdTree,
}

impl Scene {
    pub fn build(meshes: Vec<TriangleMesh>, instances: Vec<Instance>, config: &BuildConfig) -> Scene {
        let trees = build_geometry_trees(&meshes, config);
        Self::assemble(meshes, trees, instances, config)
    }

    /// Like [`Scene::build`], but per-mesh trees are loaded from `cache_dir`
    /// when a cached tree for the same geometry content exists, and saved
    /// there after building otherwise.
    pub fn build_cached(
        meshes: Vec<TriangleMesh>,
        instances: Vec<Instance>,
        config: &BuildConfig,
        cache_dir: &Path,
    ) -> Result<Scene, PersistenceError> {
        let mut trees = Vec::with_capacity(meshes.len());
        for mesh in &meshes {
            let source = MeshSource::new(mesh);
            let path = cache_dir.join(format!("{:016x}.kdtree", source.content_hash()));
            trees.push(KdTree::load_cached(&path, &source, config)?);
        }
        Ok(Self::assemble(meshes, trees, instances, config))
    }

    fn assemble(
        meshes: Vec<TriangleMesh>,
        trees: Vec<KdTree>,
        instances: Vec<Instance>,
        config: &BuildConfig,
    ) -> Scene {
        let top_level = KdTree::build(&InstanceSource::new(&instances, &meshes, &trees), config);
        Scene {
            meshes,
            trees,
            instances,
            top_level,
        }
    }

    fn instance_source(&self) -> InstanceSource<'_> {
        InstanceSource::new(&self.instances, &self.meshes, &self.trees)
    }

    /// Closest hit in the whole scene.
    pub fn intersect(&self, ray: &Ray) -> PrimitiveHit {
        let mut best = PrimitiveHit::miss();
        self.top_level.intersect(&self.instance_source(), ray, &mut best);
        best
    }

    /// Is anything closer than `t_max` along the ray?
    pub fn intersect_any(&self, ray: &Ray, t_max: FloatType) -> bool {
        self.top_level.intersect_any(&self.instance_source(), ray, t_max)
    }

    /// World space unit normal of the triangle behind a hit.
    pub fn hit_normal(&self, hit: &PrimitiveHit) -> Option<WorldVector> {
        let instance = &self.instances[hit.instance?.index()];
        let mesh = &self.meshes[instance.geometry.index()];
        let local = mesh.triangle(hit.prim).normal();
        Some(instance.normal_to_world(&local).normalize())
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn meshes(&self) -> &[TriangleMesh] {
        &self.meshes
    }

    pub fn print_statistics(&self) {
        println!("Top level tree ({} instances):", self.instances.len());
        self.top_level.print_statistics();
        for (i, tree) in self.trees.iter().enumerate() {
            println!("Geometry tree {} ({} triangles):", i, self.meshes[i].len());
            tree.print_statistics();
        }
    }
}

/// Builds the per-mesh trees in parallel. Workers claim mesh indices from a
/// shared counter, so the output is identical to a serial build regardless of
/// scheduling.
fn build_geometry_trees(meshes: &[TriangleMesh], config: &BuildConfig) -> Vec<KdTree> {
    let slots: Vec<OnceLock<KdTree>> = meshes.iter().map(|_| OnceLock::new()).collect();
    let next = AtomicUsize::new(0);
    let worker_count = num_cpus::get().min(meshes.len()).max(1);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(mesh) = meshes.get(i) else {
                        break;
                    };
                    let tree = KdTree::build(&MeshSource::new(mesh), config);
                    slots[i].set(tree).unwrap();
                }
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap())
        .collect()
}
