use std::hash::{Hash, Hasher};

use crate::geometry::{
    Aabb, BarycentricCoordinates, FloatType, Ray, WorldTransform, WorldVector,
};
use crate::scene::kd_tree::KdTree;
use crate::scene::mesh::TriangleMesh;
use crate::scene::{GeometryIdx, InstanceIdx};

/// Which half-space of a splitting plane a primitive is being clipped to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitSide {
    Below,
    Above,
}

/// What a k-d tree is built over and traversed through.
///
/// The tree itself only stores indices; everything it needs to know about the
/// actual primitives goes through this interface. There are two
/// implementations: triangles of a single mesh, and scene instances referencing
/// already built per-mesh trees (the two-level hierarchy used for instancing).
///
/// The leaf intersection callbacks are monomorphized into the traversal loop,
/// there is no dynamic dispatch on the hot path.
pub trait PrimitiveSource {
    fn len(&self) -> usize;

    fn bounds(&self, prim: usize) -> Aabb;

    /// Bounds of the primitive restricted to one side of a splitting plane.
    ///
    /// The default truncates the box at the plane. Sources that know the
    /// actual geometry should override this with a real geometric clip; the
    /// tighter boxes are what makes the surface area heuristic effective for
    /// large primitives that are not axis aligned.
    fn clip_bounds(
        &self,
        _prim: usize,
        bounds: &Aabb,
        axis: usize,
        split: FloatType,
        side: SplitSide,
    ) -> Aabb {
        let mut ret = *bounds;
        match side {
            SplitSide::Below => ret.max[axis] = ret.max[axis].min(split),
            SplitSide::Above => ret.min[axis] = ret.min[axis].max(split),
        }
        ret
    }

    /// Closest-hit test of a single primitive.
    /// Updates `best` in place and returns true if the primitive is hit closer
    /// than the current best.
    fn intersect(&self, ray: &Ray, prim: usize, best: &mut PrimitiveHit) -> bool;

    /// Any-hit test of a single primitive, used by shadow/occlusion queries.
    /// Only decides hit-or-not under `t_max`, never tracks a closest distance.
    fn intersect_any(&self, ray: &Ray, prim: usize, t_max: FloatType) -> bool;

    /// Hash of the source content, recorded into built trees so that persisted
    /// trees can be invalidated when the geometry changes.
    fn content_hash(&self) -> u64;
}

/// Caller-owned best-hit record that traversal updates in place.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrimitiveHit {
    pub t: FloatType,
    pub uv: BarycentricCoordinates,
    /// Triangle index within the hit mesh
    pub prim: usize,
    /// Which scene instance was hit; `None` for direct single-mesh queries
    pub instance: Option<InstanceIdx>,
}

impl PrimitiveHit {
    pub fn miss() -> PrimitiveHit {
        PrimitiveHit {
            t: FloatType::INFINITY,
            uv: BarycentricCoordinates::default(),
            prim: usize::MAX,
            instance: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.t.is_finite()
    }
}

impl Default for PrimitiveHit {
    fn default() -> Self {
        PrimitiveHit::miss()
    }
}

/// Alpha mask lookup for alpha-tested geometry.
/// Transparent positions make the leaf test pass through the triangle.
pub trait AlphaMask: Sync {
    fn is_opaque(&self, prim: usize, uv: &BarycentricCoordinates) -> bool;
}

/// Triangles of a single mesh.
#[derive(Copy, Clone)]
pub struct MeshSource<'a> {
    mesh: &'a TriangleMesh,
    alpha_mask: Option<&'a dyn AlphaMask>,
}

impl<'a> MeshSource<'a> {
    pub fn new(mesh: &'a TriangleMesh) -> MeshSource<'a> {
        MeshSource {
            mesh,
            alpha_mask: None,
        }
    }

    pub fn with_alpha_mask(mesh: &'a TriangleMesh, alpha_mask: &'a dyn AlphaMask) -> MeshSource<'a> {
        MeshSource {
            mesh,
            alpha_mask: Some(alpha_mask),
        }
    }

    fn passes_alpha(&self, prim: usize, uv: &BarycentricCoordinates) -> bool {
        match self.alpha_mask {
            Some(mask) => mask.is_opaque(prim, uv),
            None => true,
        }
    }
}

impl PrimitiveSource for MeshSource<'_> {
    fn len(&self) -> usize {
        self.mesh.len()
    }

    fn bounds(&self, prim: usize) -> Aabb {
        self.mesh.triangle(prim).bounds()
    }

    /// Clips the actual triangle against the half-space instead of truncating
    /// the box. The point where an edge crosses the plane is snapped onto the
    /// plane so the clipped box always stays in contact with it.
    fn clip_bounds(
        &self,
        prim: usize,
        bounds: &Aabb,
        axis: usize,
        split: FloatType,
        side: SplitSide,
    ) -> Aabb {
        let triangle = self.mesh.triangle(prim);
        let mut clipped = Aabb::empty();

        for i in 0..3 {
            let p = triangle[i];
            let q = triangle[(i + 1) % 3];
            let p_inside = match side {
                SplitSide::Below => p[axis] <= split,
                SplitSide::Above => p[axis] >= split,
            };
            let q_inside = match side {
                SplitSide::Below => q[axis] <= split,
                SplitSide::Above => q[axis] >= split,
            };

            if p_inside {
                clipped.add_point(&p);
            }
            if p_inside != q_inside {
                let s = (split - p[axis]) / (q[axis] - p[axis]);
                let mut crossing = p + (q - p) * s;
                crossing[axis] = split;
                clipped.add_point(&crossing);
            }
        }

        clipped.intersection(bounds)
    }

    fn intersect(&self, ray: &Ray, prim: usize, best: &mut PrimitiveHit) -> bool {
        let Some(hit) = self.mesh.triangle(prim).intersect_watertight(ray) else {
            return false;
        };
        if hit.t >= best.t {
            return false;
        }
        if !self.passes_alpha(prim, &hit.uv) {
            return false;
        }

        *best = PrimitiveHit {
            t: hit.t,
            uv: hit.uv,
            prim,
            instance: None,
        };
        true
    }

    fn intersect_any(&self, ray: &Ray, prim: usize, t_max: FloatType) -> bool {
        let Some(hit) = self.mesh.triangle(prim).intersect_watertight(ray) else {
            return false;
        };
        hit.t < t_max && self.passes_alpha(prim, &hit.uv)
    }

    fn content_hash(&self) -> u64 {
        self.mesh.content_hash()
    }
}

/// A placed copy of a geometry in the scene.
#[derive(Clone, Debug)]
pub struct Instance {
    pub geometry: GeometryIdx,
    transform: WorldTransform,
    inverse: WorldTransform,
}

impl Instance {
    pub fn new(geometry: GeometryIdx, transform: WorldTransform) -> Instance {
        Instance {
            geometry,
            transform,
            inverse: transform.inverse(),
        }
    }

    pub fn transform(&self) -> &WorldTransform {
        &self.transform
    }

    /// Maps a world space ray into instance space.
    /// The direction is deliberately not re-normalized so that distances along
    /// the local ray stay parametrized in world units and can be compared
    /// against hits from other instances directly.
    pub fn to_local_ray(&self, ray: &Ray) -> Ray {
        Ray::with_raw_direction(self.inverse * ray.origin, self.inverse * ray.direction)
    }

    /// Maps an instance space normal back into world space.
    /// Normals transform by the inverse transpose, not by the transform
    /// itself. The result is not normalized.
    pub fn normal_to_world(&self, normal: &WorldVector) -> WorldVector {
        self.inverse.matrix().fixed_view::<3, 3>(0, 0).transpose() * normal
    }
}

/// Scene instances as primitives: the top level of the two-level hierarchy.
/// A leaf hit here forwards the ray (in instance space) into the per-mesh tree.
#[derive(Copy, Clone)]
pub struct InstanceSource<'a> {
    instances: &'a [Instance],
    meshes: &'a [TriangleMesh],
    trees: &'a [KdTree],
}

impl<'a> InstanceSource<'a> {
    pub fn new(
        instances: &'a [Instance],
        meshes: &'a [TriangleMesh],
        trees: &'a [KdTree],
    ) -> InstanceSource<'a> {
        assert!(meshes.len() == trees.len());
        InstanceSource {
            instances,
            meshes,
            trees,
        }
    }
}

impl PrimitiveSource for InstanceSource<'_> {
    fn len(&self) -> usize {
        self.instances.len()
    }

    fn bounds(&self, prim: usize) -> Aabb {
        let instance = &self.instances[prim];
        let local = self.trees[instance.geometry.index()].bounds();
        let mut ret = Aabb::empty();
        for corner in local.corners() {
            ret.add_point(&(instance.transform * corner));
        }
        ret
    }

    fn intersect(&self, ray: &Ray, prim: usize, best: &mut PrimitiveHit) -> bool {
        let instance = &self.instances[prim];
        let local_ray = instance.to_local_ray(ray);
        let geometry = instance.geometry.index();
        let source = MeshSource::new(&self.meshes[geometry]);

        if self.trees[geometry].intersect(&source, &local_ray, best) {
            best.instance = Some(InstanceIdx::from_usize(prim));
            true
        } else {
            false
        }
    }

    fn intersect_any(&self, ray: &Ray, prim: usize, t_max: FloatType) -> bool {
        let instance = &self.instances[prim];
        let local_ray = instance.to_local_ray(ray);
        let geometry = instance.geometry.index();
        let source = MeshSource::new(&self.meshes[geometry]);

        self.trees[geometry].intersect_any(&source, &local_ray, t_max)
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        for instance in self.instances {
            instance.geometry.index().hash(&mut hasher);
            for x in instance.transform.matrix().iter() {
                x.to_bits().hash(&mut hasher);
            }
        }
        for tree in self.trees {
            tree.source_hash().hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;

    use crate::geometry::WorldPoint;

    #[test]
    fn triangle_clip_is_tighter_than_truncation() {
        // A long skewed triangle; truncating its box at x = 0 keeps the full
        // y extent, clipping the actual geometry does not.
        let mesh = TriangleMesh::new(
            vec![
                WorldPoint::new(-1.0, 0.0, 0.0),
                WorldPoint::new(1.0, 2.0, 0.0),
                WorldPoint::new(1.0, 2.5, 0.0),
            ],
            vec![crate::geometry::Triangle::new(0, 1, 2)],
        );
        let source = MeshSource::new(&mesh);

        let bounds = source.bounds(0);
        let clipped = source.clip_bounds(0, &bounds, 0, 0.0, SplitSide::Below);

        assert!(!clipped.is_empty());
        assert!(clipped.max.x == 0.0);
        // At x <= 0 the triangle only reaches y ~ 1.25
        assert!(clipped.max.y < 1.3);
        assert!(clipped.min.y == 0.0);
    }

    #[test]
    fn clip_to_empty_side_is_empty() {
        let mesh = TriangleMesh::new(
            vec![
                WorldPoint::new(1.0, 0.0, 0.0),
                WorldPoint::new(2.0, 0.0, 0.0),
                WorldPoint::new(1.5, 1.0, 0.0),
            ],
            vec![crate::geometry::Triangle::new(0, 1, 2)],
        );
        let source = MeshSource::new(&mesh);

        let bounds = source.bounds(0);
        let clipped = source.clip_bounds(0, &bounds, 0, 0.0, SplitSide::Below);
        assert!(clipped.is_empty());
    }

    #[test]
    fn alpha_mask_rejects_hits() {
        struct Transparent;
        impl AlphaMask for Transparent {
            fn is_opaque(&self, _prim: usize, _uv: &BarycentricCoordinates) -> bool {
                false
            }
        }

        let mesh = TriangleMesh::new(
            vec![
                WorldPoint::new(-1.0, -1.0, 0.0),
                WorldPoint::new(1.0, -1.0, 0.0),
                WorldPoint::new(0.0, 1.0, 0.0),
            ],
            vec![crate::geometry::Triangle::new(0, 1, 2)],
        );
        let ray = Ray::new(
            WorldPoint::new(0.0, 0.0, 5.0),
            crate::geometry::WorldVector::new(0.0, 0.0, -1.0),
        );

        let mut best = PrimitiveHit::miss();
        assert!(MeshSource::new(&mesh).intersect(&ray, 0, &mut best));

        let mut best = PrimitiveHit::miss();
        let masked = MeshSource::with_alpha_mask(&mesh, &Transparent);
        assert!(!masked.intersect(&ray, 0, &mut best));
        assert!(!masked.intersect_any(&ray, 0, FloatType::INFINITY));
    }
}
