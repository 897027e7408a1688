mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

pub use aabb::Aabb;
pub use ray_triangle_intersection::TriangleHit;
pub use triangle::Triangle;

pub type FloatType = f32;
pub const EPSILON: FloatType = 1e-6;

pub type WorldPoint = nalgebra::Point3<FloatType>;
pub type WorldVector = nalgebra::Vector3<FloatType>;
/// Instance-to-world (or back) placement of a geometry in the scene
pub type WorldTransform = nalgebra::Affine3<FloatType>;

pub type ScreenPoint = nalgebra::Point2<u32>;
pub type ScreenSize = nalgebra::Vector2<u32>;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray.
    /// Normalized for camera rays; instance-space rays keep the transformed
    /// (scaled) direction so that distances stay parametrized in world units.
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        Ray::with_raw_direction(origin, direction.normalize())
    }

    /// Builds a ray without normalizing the direction.
    pub fn with_raw_direction(origin: WorldPoint, direction: WorldVector) -> Ray {
        let inv_direction = direction.map(|x| if x == 0.0 { FloatType::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }
}

/// Barycentric position inside a triangle.
/// The weights of the three vertices are `(1 - u - v, u, v)`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BarycentricCoordinates {
    pub u: FloatType,
    pub v: FloatType,
}

impl BarycentricCoordinates {
    pub fn interpolate(&self, a: &WorldVector, b: &WorldVector, c: &WorldVector) -> WorldVector {
        a * (1.0 - self.u - self.v) + b * self.u + c * self.v
    }

    pub fn interpolate_point(&self, triangle: &Triangle<WorldPoint>) -> WorldPoint {
        WorldPoint {
            coords: self.interpolate(
                &triangle[0].coords,
                &triangle[1].coords,
                &triangle[2].coords,
            ),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.u >= 0.0 && self.v >= 0.0 && self.u + self.v <= 1.0
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use proptest::prelude::*;

    /// Helper macro that creates a wrapper arnound a type that implemetns Deref and Arbitary
    macro_rules! arbitrary_wrapper {
        ( $wrapper_name:ident ( $type:ty ) -> $block:block ) => {
            #[derive(Copy, Clone, Debug)]
            pub struct $wrapper_name(pub $type);

            impl std::ops::Deref for $wrapper_name {
                type Target = $type;
                fn deref(&self) -> &$type {
                    &self.0
                }
            }

            impl Arbitrary for $wrapper_name {
                type Parameters = ();
                type Strategy = proptest::strategy::BoxedStrategy<Self>;
                fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                    $block.prop_map(|x| $wrapper_name(x)).boxed()
                }
            }
        };
    }

    pub fn simple_float() -> BoxedStrategy<FloatType> {
        any::<i32>().prop_map(|n| n as FloatType * 1e-3).boxed()
    }

    arbitrary_wrapper! {
        WorldPointWrapper(WorldPoint) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_map(|coords| {
                    WorldPoint::new(coords.0, coords.1, coords.2)
                })
        }
    }

    arbitrary_wrapper! {
        NonzeroWorldVectorWrapper(WorldVector) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_filter_map(
                    "vector is zero",
                    |coords| {
                        let vector = WorldVector::new(coords.0, coords.1, coords.2);
                        if vector.norm() < 1e-3 {
                            None
                        } else {
                            Some(vector)
                        }
                    })
        }
    }

    arbitrary_wrapper! {
        NondegenerateRayWrapper(Ray) -> {
            (
                any::<WorldPointWrapper>(),
                any::<NonzeroWorldVectorWrapper>(),
            )
                .prop_filter_map(
                    "direction has a zero component",
                    |(origin, direction)| {
                        if direction.iter().any(|x| *x == 0.0) {
                            None
                        } else {
                            Some(Ray::new(*origin, *direction))
                        }
                    })
        }
    }

    arbitrary_wrapper! {
        RayWrapper(Ray) -> {
            (
                any::<WorldPointWrapper>(),
                any::<NonzeroWorldVectorWrapper>(),
            )
                .prop_map(|(origin, direction)| Ray::new(*origin, *direction))
        }
    }

    arbitrary_wrapper! {
        TriangleWrapper(Triangle<WorldPoint>) -> {
            (
                any::<WorldPointWrapper>(),
                any::<WorldPointWrapper>(),
                any::<WorldPointWrapper>(),
            )
                .prop_map(|(a, b, c)| Triangle::new(*a, *b, *c))
        }
    }
}
