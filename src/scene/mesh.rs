use std::{
    fs,
    hash::{Hash, Hasher},
    path::Path,
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::geometry::{FloatType, Triangle, WorldPoint};

/// Indexed triangle soup. Owns the geometry that k-d trees are built over;
/// the trees themselves never own geometry, they only keep indices into it.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    positions: Vec<WorldPoint>,
    triangles: Vec<Triangle<usize>>,
}

impl TriangleMesh {
    pub fn new(positions: Vec<WorldPoint>, triangles: Vec<Triangle<usize>>) -> TriangleMesh {
        TriangleMesh {
            positions,
            triangles,
        }
    }

    pub fn with_obj(p: impl AsRef<Path>) -> Result<TriangleMesh, ObjOpenError> {
        let content = fs::read_to_string(p)?;
        let parsed = wavefront_obj::obj::parse(content)?;
        Ok(Self::load_obj(parsed))
    }

    fn load_obj(obj: wavefront_obj::obj::ObjSet) -> TriangleMesh {
        let mut triangles = Vec::new();
        let mut vertices = IndexMap::new();

        for (object_index, o) in obj.objects.into_iter().enumerate() {
            for geometry in o.geometry {
                for shape in geometry.shapes {
                    let wavefront_obj::obj::Primitive::Triangle(a, b, c) = shape.primitive else {
                        println!("non-triangle primitive!");
                        continue;
                    };

                    let mut handle_vertex = |vtindex: (usize, Option<usize>, Option<usize>)| {
                        let entry = vertices.entry((object_index, vtindex.0));
                        let index = entry.index();
                        entry.or_insert_with(|| {
                            let vertex = &o.vertices[vtindex.0];
                            WorldPoint::new(
                                vertex.x as FloatType,
                                vertex.y as FloatType,
                                vertex.z as FloatType,
                            )
                        });
                        index
                    };

                    let a = handle_vertex(a);
                    let b = handle_vertex(b);
                    let c = handle_vertex(c);

                    triangles.push(Triangle::new(a, b, c));
                }
            }
        }

        TriangleMesh {
            positions: vertices.into_iter().map(|(_k, v)| v).collect(),
            triangles,
        }
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn positions(&self) -> &[WorldPoint] {
        &self.positions
    }

    pub fn triangle_indices(&self, i: usize) -> &Triangle<usize> {
        &self.triangles[i]
    }

    pub fn triangle(&self, i: usize) -> Triangle<WorldPoint> {
        self.triangles[i].map(|vi| self.positions[*vi])
    }

    /// Hash of the whole geometry content.
    /// Persisted k-d trees are invalidated by comparing this against the hash
    /// recorded when the tree was built.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        for p in &self.positions {
            for x in p.iter() {
                x.to_bits().hash(&mut hasher);
            }
        }
        for t in &self.triangles {
            for i in t.iter() {
                i.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Axis aligned box centered at the origin. 8 vertices, 12 triangles,
    /// wound counterclockwise when seen from outside.
    pub fn cube(half_extent: FloatType) -> TriangleMesh {
        let h = half_extent;
        let positions = vec![
            WorldPoint::new(-h, -h, -h),
            WorldPoint::new(h, -h, -h),
            WorldPoint::new(h, h, -h),
            WorldPoint::new(-h, h, -h),
            WorldPoint::new(-h, -h, h),
            WorldPoint::new(h, -h, h),
            WorldPoint::new(h, h, h),
            WorldPoint::new(-h, h, h),
        ];
        let quads = [
            [0, 3, 2, 1], // -z
            [4, 5, 6, 7], // +z
            [0, 1, 5, 4], // -y
            [2, 3, 7, 6], // +y
            [0, 4, 7, 3], // -x
            [1, 2, 6, 5], // +x
        ];
        let triangles = quads
            .iter()
            .flat_map(|q| {
                [
                    Triangle::new(q[0], q[1], q[2]),
                    Triangle::new(q[0], q[2], q[3]),
                ]
            })
            .collect();
        TriangleMesh {
            positions,
            triangles,
        }
    }

    /// Latitude/longitude tessellated sphere centered at the origin.
    /// Closed and consistently wound; used by the watertightness tests and as
    /// procedural demo geometry.
    pub fn tessellated_sphere(radius: FloatType, slices: usize, stacks: usize) -> TriangleMesh {
        assert!(slices >= 3);
        assert!(stacks >= 2);

        let mut positions = Vec::with_capacity(slices * (stacks - 1) + 2);
        positions.push(WorldPoint::new(0.0, 0.0, radius)); // north pole
        for stack in 1..stacks {
            let theta = std::f32::consts::PI * (stack as FloatType) / (stacks as FloatType);
            let (sin_theta, cos_theta) = theta.sin_cos();
            for slice in 0..slices {
                let phi =
                    2.0 * std::f32::consts::PI * (slice as FloatType) / (slices as FloatType);
                let (sin_phi, cos_phi) = phi.sin_cos();
                positions.push(WorldPoint::new(
                    radius * sin_theta * cos_phi,
                    radius * sin_theta * sin_phi,
                    radius * cos_theta,
                ));
            }
        }
        let south = positions.len();
        positions.push(WorldPoint::new(0.0, 0.0, -radius));

        let ring = |stack: usize, slice: usize| 1 + (stack - 1) * slices + (slice % slices);

        let mut triangles = Vec::with_capacity(2 * slices * (stacks - 1));
        for slice in 0..slices {
            // polar caps
            triangles.push(Triangle::new(0, ring(1, slice), ring(1, slice + 1)));
            triangles.push(Triangle::new(
                south,
                ring(stacks - 1, slice + 1),
                ring(stacks - 1, slice),
            ));
        }
        for stack in 1..stacks - 1 {
            for slice in 0..slices {
                let a = ring(stack, slice);
                let b = ring(stack, slice + 1);
                let c = ring(stack + 1, slice);
                let d = ring(stack + 1, slice + 1);
                triangles.push(Triangle::new(a, c, b));
                triangles.push(Triangle::new(b, c, d));
            }
        }

        TriangleMesh {
            positions,
            triangles,
        }
    }
}

#[derive(Debug, Error)]
pub enum ObjOpenError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    ParseError(#[from] wavefront_obj::ParseError),
}
