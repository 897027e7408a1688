use crate::geometry::{BarycentricCoordinates, FloatType, Ray, Triangle, WorldPoint, WorldVector};

/// Result of a ray/triangle intersection test.
/// The intersection point is `(1 - u - v) * p0 + u * p1 + v * p2`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleHit {
    pub t: FloatType,
    pub uv: BarycentricCoordinates,
}

impl Triangle<WorldPoint> {
    /// Division based (two sided) ray/triangle test.
    /// Rejects parallel rays on a zero determinant and hits behind the origin.
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm
    pub fn intersect_moller_trumbore(&self, ray: &Ray) -> Option<TriangleHit> {
        let (e1, e2) = self.edges();

        let ray_cross_e2 = ray.direction.cross(&e2);
        let det = e1.dot(&ray_cross_e2);
        if det == 0.0 {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = ray.origin - self[0];
        let u = inv_det * s.dot(&ray_cross_e2);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * ray.direction.dot(&s_cross_e1);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = inv_det * e2.dot(&s_cross_e1);
        if t <= 0.0 {
            return None;
        }

        Some(TriangleHit {
            t,
            uv: BarycentricCoordinates { u, v },
        })
    }

    /// Watertight (two sided) ray/triangle test.
    ///
    /// Shears the triangle into a coordinate system where the ray goes along +z,
    /// then decides by the signs of the three 2D edge functions. Edge functions
    /// that come out exactly zero are re-evaluated in double precision, which
    /// breaks ties deterministically: a ray crossing the shared edge of two
    /// adjacent triangles hits at least one of them, never neither.
    ///
    /// This is the kernel the k-d tree leaf test uses; cracks between adjacent
    /// triangles would be a correctness bug, not a cosmetic one.
    pub fn intersect_watertight(&self, ray: &Ray) -> Option<TriangleHit> {
        // Vertices relative to the ray origin
        let p0 = self[0] - ray.origin;
        let p1 = self[1] - ray.origin;
        let p2 = self[2] - ray.origin;

        // Permute the axes so that the dominant direction axis becomes z.
        // This keeps the projection used by the edge functions non-degenerate.
        let kz = max_dimension(&ray.direction);
        let kx = (kz + 1) % 3;
        let ky = (kx + 1) % 3;
        let d = WorldVector::new(ray.direction[kx], ray.direction[ky], ray.direction[kz]);
        let mut p0t = WorldVector::new(p0[kx], p0[ky], p0[kz]);
        let mut p1t = WorldVector::new(p1[kx], p1[ky], p1[kz]);
        let mut p2t = WorldVector::new(p2[kx], p2[ky], p2[kz]);

        // Shear so the ray direction becomes (0, 0, 1). The z shear is applied
        // only when actually needed for the distance.
        let sx = -d.x / d.z;
        let sy = -d.y / d.z;
        let sz = 1.0 / d.z;
        p0t.x += sx * p0t.z;
        p0t.y += sy * p0t.z;
        p1t.x += sx * p1t.z;
        p1t.y += sy * p1t.z;
        p2t.x += sx * p2t.z;
        p2t.y += sy * p2t.z;

        // Signed edge functions of the sheared triangle
        let mut e0 = p1t.x * p2t.y - p1t.y * p2t.x;
        let mut e1 = p2t.x * p0t.y - p2t.y * p0t.x;
        let mut e2 = p0t.x * p1t.y - p0t.y * p1t.x;

        if e0 == 0.0 || e1 == 0.0 || e2 == 0.0 {
            e0 = (p1t.x as f64 * p2t.y as f64 - p1t.y as f64 * p2t.x as f64) as FloatType;
            e1 = (p2t.x as f64 * p0t.y as f64 - p2t.y as f64 * p0t.x as f64) as FloatType;
            e2 = (p0t.x as f64 * p1t.y as f64 - p0t.y as f64 * p1t.x as f64) as FloatType;
        }

        if (e0 < 0.0 || e1 < 0.0 || e2 < 0.0) && (e0 > 0.0 || e1 > 0.0 || e2 > 0.0) {
            return None;
        }
        let det = e0 + e1 + e2;
        if det == 0.0 {
            return None;
        }

        // Scaled distance; the sign test against det rejects hits behind the
        // origin without dividing first.
        p0t.z *= sz;
        p1t.z *= sz;
        p2t.z *= sz;
        let t_scaled = e0 * p0t.z + e1 * p1t.z + e2 * p2t.z;
        if det < 0.0 && t_scaled >= 0.0 {
            return None;
        }
        if det > 0.0 && t_scaled <= 0.0 {
            return None;
        }

        let inv_det = 1.0 / det;
        Some(TriangleHit {
            t: t_scaled * inv_det,
            uv: BarycentricCoordinates {
                u: e1 * inv_det,
                v: e2 * inv_det,
            },
        })
    }
}

fn max_dimension(v: &WorldVector) -> usize {
    let a = v.map(|x| x.abs());
    if a.x > a.y {
        if a.x > a.z { 0 } else { 2 }
    } else if a.y > a.z {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod test {
    use assert2::{assert, let_assert};
    use test_case::test_case;
    use test_strategy::proptest;

    use crate::geometry::test::{RayWrapper, TriangleWrapper};
    use crate::geometry::{Ray, Triangle, WorldPoint, WorldVector};

    fn example_triangle() -> Triangle<WorldPoint> {
        Triangle::new(
            WorldPoint::new(-1.0, -1.0, 0.0),
            WorldPoint::new(1.0, -1.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        )
    }

    #[test_case(0.0, 0.0 ; "center")]
    #[test_case(0.0, -0.9 ; "near_bottom_edge")]
    #[test_case(0.0, 0.9 ; "near_top_vertex")]
    #[test_case(-0.7, -0.8 ; "near_left_vertex")]
    fn both_kernels_hit_from_front(x: f32, y: f32) {
        let t = example_triangle();
        let ray = Ray::new(WorldPoint::new(x, y, 3.0), WorldVector::new(0.0, 0.0, -1.0));

        let_assert!(Some(mt) = t.intersect_moller_trumbore(&ray));
        let_assert!(Some(wt) = t.intersect_watertight(&ray));

        assert!((mt.t - 3.0).abs() < 1e-5);
        assert!((wt.t - 3.0).abs() < 1e-5);
        assert!(mt.uv.is_valid());
        assert!(wt.uv.is_valid());
    }

    /// Both tests are two sided: a hit from behind the triangle counts too.
    #[test]
    fn both_kernels_hit_from_back() {
        let t = example_triangle();
        let ray = Ray::new(
            WorldPoint::new(0.0, 0.0, -3.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );
        assert!(t.intersect_moller_trumbore(&ray).is_some());
        assert!(t.intersect_watertight(&ray).is_some());
    }

    #[test]
    fn parallel_ray_misses() {
        let t = example_triangle();
        let ray = Ray::new(
            WorldPoint::new(0.0, 0.0, 1.0),
            WorldVector::new(1.0, 0.0, 0.0),
        );
        assert!(t.intersect_moller_trumbore(&ray) == None);
        assert!(t.intersect_watertight(&ray) == None);
    }

    #[test]
    fn triangle_behind_origin_misses() {
        let t = example_triangle();
        let ray = Ray::new(
            WorldPoint::new(0.0, 0.0, 3.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );
        assert!(t.intersect_moller_trumbore(&ray) == None);
        assert!(t.intersect_watertight(&ray) == None);
    }

    #[test]
    fn outside_triangle_misses() {
        let t = example_triangle();
        let ray = Ray::new(
            WorldPoint::new(2.0, 0.0, 3.0),
            WorldVector::new(0.0, 0.0, -1.0),
        );
        assert!(t.intersect_moller_trumbore(&ray) == None);
        assert!(t.intersect_watertight(&ray) == None);
    }

    /// A ray aimed exactly through the shared edge of two adjacent triangles
    /// must hit at least one of them. The division based kernel makes no such
    /// promise, the watertight one does.
    #[test]
    fn shared_edge_is_watertight() {
        let a = Triangle::new(
            WorldPoint::new(-1.0, -1.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
            WorldPoint::new(-2.0, 1.0, 0.0),
        );
        let b = Triangle::new(
            WorldPoint::new(-1.0, -1.0, 0.0),
            WorldPoint::new(1.0, -1.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        );

        // Points on the shared edge between (-1, -1) and (0, 1)
        for s in [0.0, 0.125, 0.25, 0.5, 0.75, 0.875, 1.0] {
            let x = -1.0 + s;
            let y = -1.0 + 2.0 * s;
            let ray = Ray::new(WorldPoint::new(x, y, 5.0), WorldVector::new(0.0, 0.0, -1.0));

            let hits = [a.intersect_watertight(&ray), b.intersect_watertight(&ray)];
            assert!(
                hits.iter().any(|h| h.is_some()),
                "crack at edge parameter {s}"
            );
        }
    }

    /// The kernels must agree within tolerance on well conditioned inputs.
    #[proptest]
    fn kernels_agree(triangle: TriangleWrapper, ray: RayWrapper) {
        // Only check triangles that are not too close to degenerate and hits
        // that are not grazing; disagreement there is allowed.
        let normal = triangle.normal();
        if normal.norm() < 1e-3 {
            return Ok(());
        }
        let cos = normal.normalize().dot(&ray.direction).abs();
        if cos < 1e-2 {
            return Ok(());
        }

        let mt = triangle.intersect_moller_trumbore(&ray);
        let wt = triangle.intersect_watertight(&ray);

        if let (Some(mt), Some(wt)) = (mt, wt) {
            assert!((mt.t - wt.t).abs() <= 1e-3 * (1.0 + mt.t.abs()));
            assert!((mt.uv.u - wt.uv.u).abs() <= 1e-3);
            assert!((mt.uv.v - wt.uv.v).abs() <= 1e-3);
        }
    }
}
