use std::ops::Index;

use crate::geometry::{Aabb, WorldPoint, WorldVector};

/// Three of anything. Vertices, vertex indices, ...
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.0.iter()
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> Triangle<Point2> {
        Triangle([f(&self.0[0]), f(&self.0[1]), f(&self.0[2])])
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl Triangle<WorldPoint> {
    /// Edge vectors coming from the first vertex.
    pub fn edges(&self) -> (WorldVector, WorldVector) {
        (self[1] - self[0], self[2] - self[0])
    }

    /// Geometric (unnormalized) normal of the triangle.
    /// Zero for degenerate triangles.
    pub fn normal(&self) -> WorldVector {
        let (e1, e2) = self.edges();
        e1.cross(&e2)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.iter())
    }
}
