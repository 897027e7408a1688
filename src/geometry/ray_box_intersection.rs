use crate::geometry::{Aabb, FloatType, Ray};

impl Aabb {
    /// Calculates ray intersection with the box.
    /// Returns minimum and maximum distance along the ray, clipped to `[0, inf)`.
    /// `None` means the ray misses the box.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(FloatType, FloatType)> {
        let mut t_min: FloatType = 0.0;
        let mut t_max = FloatType::INFINITY;

        for axis in 0..3 {
            let inv = ray.inv_direction[axis];
            let mut t_near = (self.min[axis] - ray.origin[axis]) * inv;
            let mut t_far = (self.max[axis] - ray.origin[axis]) * inv;
            if inv < 0.0 {
                std::mem::swap(&mut t_near, &mut t_far);
            }

            // The multiplication is NaN when the ray starts exactly on a slab
            // plane it is parallel to. The comparisons below evaluate false for
            // NaN, keeping the previous bound, which treats that ray as inside
            // the slab.
            if t_near > t_min {
                t_min = t_near;
            }
            if t_far < t_max {
                t_max = t_far;
            }
            if t_min > t_max {
                return None;
            }
        }

        Some((t_min, t_max))
    }

    /// Equivalent to `intersect_ray`, but never multiplies by an infinite
    /// reciprocal: axes where the direction is zero are resolved by a
    /// containment check on the ray origin instead. Build configurations that
    /// trap on invalid floating point operations need this variant.
    ///
    /// For rays without zero direction components the two variants produce
    /// bit-identical results.
    pub fn intersect_ray_guarded(&self, ray: &Ray) -> Option<(FloatType, FloatType)> {
        let mut t_min: FloatType = 0.0;
        let mut t_max = FloatType::INFINITY;

        for axis in 0..3 {
            if ray.direction[axis] == 0.0 {
                if ray.origin[axis] < self.min[axis] || ray.origin[axis] > self.max[axis] {
                    return None;
                }
                continue;
            }

            let inv = ray.inv_direction[axis];
            let mut t_near = (self.min[axis] - ray.origin[axis]) * inv;
            let mut t_far = (self.max[axis] - ray.origin[axis]) * inv;
            if inv < 0.0 {
                std::mem::swap(&mut t_near, &mut t_far);
            }

            if t_near > t_min {
                t_min = t_near;
            }
            if t_far < t_max {
                t_max = t_far;
            }
            if t_min > t_max {
                return None;
            }
        }

        Some((t_min, t_max))
    }
}
