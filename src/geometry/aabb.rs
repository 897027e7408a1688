use crate::geometry::{FloatType, WorldPoint, WorldVector};

/// Axis aligned bounding box.
///
/// An empty box uses infinite sentinel corners (`min = +inf`, `max = -inf`),
/// which makes it the identity of `union` and the absorbing element of
/// `intersection`. Boxes are plain values, always passed and returned by value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: WorldPoint,
    pub max: WorldPoint,
}

impl Aabb {
    pub fn new(min: WorldPoint, max: WorldPoint) -> Aabb {
        Aabb { min, max }
    }

    pub fn empty() -> Aabb {
        Aabb {
            min: WorldPoint::new(
                FloatType::INFINITY,
                FloatType::INFINITY,
                FloatType::INFINITY,
            ),
            max: WorldPoint::new(
                FloatType::NEG_INFINITY,
                FloatType::NEG_INFINITY,
                FloatType::NEG_INFINITY,
            ),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a WorldPoint>) -> Aabb {
        let mut ret = Aabb::empty();
        for p in points {
            ret.add_point(p);
        }
        ret
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    pub fn add_point(&mut self, p: &WorldPoint) {
        self.min = self.min.coords.inf(&p.coords).into();
        self.max = self.max.coords.sup(&p.coords).into();
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.coords.inf(&other.min.coords).into(),
            max: self.max.coords.sup(&other.max.coords).into(),
        }
    }

    pub fn intersection(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.coords.sup(&other.min.coords).into(),
            max: self.max.coords.inf(&other.max.coords).into(),
        }
    }

    pub fn size(&self) -> WorldVector {
        self.max - self.min
    }

    pub fn center(&self) -> WorldPoint {
        WorldPoint {
            coords: (self.min.coords + self.max.coords) / 2.0,
        }
    }

    pub fn surface_area(&self) -> FloatType {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Index of the axis along which the box is largest.
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x > d.y {
            if d.x > d.z { 0 } else { 2 }
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    pub fn contains(&self, p: &WorldPoint) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }

    pub fn corners(&self) -> [WorldPoint; 8] {
        std::array::from_fn(|i| {
            WorldPoint::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::empty()
    }
}
