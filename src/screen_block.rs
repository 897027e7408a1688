use std::iter::FusedIterator;
use std::num::NonZeroU32;

use crate::geometry::{ScreenPoint, ScreenSize};

/// Half open rectangle of pixels, `min` inclusive, `max` exclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScreenBlock {
    pub min: ScreenPoint,
    pub max: ScreenPoint,
}

impl ScreenBlock {
    pub fn new(min: ScreenPoint, max: ScreenPoint) -> ScreenBlock {
        ScreenBlock { min, max }
    }

    pub fn from_size(size: ScreenSize) -> ScreenBlock {
        ScreenBlock {
            min: ScreenPoint::new(0, 0),
            max: ScreenPoint::new(size.x, size.y),
        }
    }

    pub fn width(&self) -> u32 {
        self.max.x.saturating_sub(self.min.x)
    }

    pub fn height(&self) -> u32 {
        self.max.y.saturating_sub(self.min.y)
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    pub fn contains(&self, p: &ScreenPoint) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    /// Iterator over the pixel coordinates inside the block, in row major
    /// order (x changes first, then y).
    pub fn internal_points(&self) -> InternalPoints {
        if self.is_empty() {
            InternalPoints::empty()
        } else {
            InternalPoints {
                min_x: self.min.x,
                max: self.max,
                cursor: self.min,
            }
        }
    }

    /// Splits the block into tiles and orders them by distance from the
    /// block center, so a live preview fills in the interesting middle part
    /// of the image first. Tiles at the right and bottom edge may be clipped.
    pub fn tile_ordering(&self, tile_size: NonZeroU32) -> Vec<ScreenBlock> {
        let step = tile_size.get();

        let mut tiles = Vec::new();
        let mut y = self.min.y;
        while y < self.max.y {
            let mut x = self.min.x;
            while x < self.max.x {
                tiles.push(ScreenBlock::new(
                    ScreenPoint::new(x, y),
                    ScreenPoint::new((x + step).min(self.max.x), (y + step).min(self.max.y)),
                ));
                x += step;
            }
            y += step;
        }

        let center_x = (self.min.x + self.max.x) as i64;
        let center_y = (self.min.y + self.max.y) as i64;
        // Everything times two to stay in integers. The sort is stable, so
        // ties keep row major order and the result is deterministic.
        tiles.sort_by_key(|tile| {
            let dx = (tile.min.x + tile.max.x) as i64 - center_x;
            let dy = (tile.min.y + tile.max.y) as i64 - center_y;
            dx * dx + dy * dy
        });
        tiles
    }
}

#[derive(Copy, Clone, Debug)]
pub struct InternalPoints {
    min_x: u32,
    max: ScreenPoint,

    cursor: ScreenPoint,
}

impl InternalPoints {
    fn empty() -> Self {
        InternalPoints {
            min_x: 1,
            max: ScreenPoint::new(0, 0),
            cursor: ScreenPoint::new(0, 0),
        }
    }
}

impl Iterator for InternalPoints {
    type Item = ScreenPoint;

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.y >= self.max.y {
            return None;
        }

        let ret = self.cursor;

        debug_assert!(self.cursor.x < self.max.x);
        self.cursor.x += 1;
        if self.cursor.x >= self.max.x {
            self.cursor.x = self.min_x;
            self.cursor.y += 1;
        }

        Some(ret)
    }
}

impl ExactSizeIterator for InternalPoints {
    fn len(&self) -> usize {
        if self.cursor.y >= self.max.y {
            return 0;
        }
        let current_row = (self.max.x - self.cursor.x) as usize;
        let whole_rows = (self.max.y - self.cursor.y - 1) as usize;
        current_row + whole_rows * (self.max.x - self.min_x) as usize
    }
}

impl FusedIterator for InternalPoints {}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use test_strategy::proptest;

    use proptest::prelude::*;

    #[derive(Copy, Clone, Debug)]
    struct ScreenBlockWrapper(ScreenBlock);

    impl std::ops::Deref for ScreenBlockWrapper {
        type Target = ScreenBlock;
        fn deref(&self) -> &ScreenBlock {
            &self.0
        }
    }

    impl Arbitrary for ScreenBlockWrapper {
        type Parameters = ();
        type Strategy = proptest::strategy::BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            const RANGE: std::ops::Range<u32> = 0..100u32;
            (RANGE, RANGE, RANGE, RANGE)
                .prop_map(|coords| {
                    ScreenBlockWrapper(ScreenBlock::new(
                        ScreenPoint::new(coords.0, coords.1),
                        ScreenPoint::new(coords.2, coords.3),
                    ))
                })
                .boxed()
        }
    }

    fn safe_area(block: &ScreenBlock) -> usize {
        if block.is_empty() { 0 } else { block.area() as usize }
    }

    /// Checks that the iterator visits every pixel of the block exactly once.
    fn check_covers_block(points: impl Iterator<Item = ScreenPoint>, block: &ScreenBlock) {
        let mut visited = vec![false; safe_area(block)];
        for p in points {
            assert!(block.contains(&p));
            let index = (p.x - block.min.x) + (p.y - block.min.y) * block.width();
            assert!(!visited[index as usize]);
            visited[index as usize] = true;
        }
        assert!(visited.into_iter().all(|v| v));
    }

    #[proptest]
    fn pixel_iterator_covers_all(block: ScreenBlockWrapper) {
        check_covers_block(block.internal_points(), &block);
    }

    /// The length report must stay exact at every step of the iteration.
    #[proptest]
    fn pixel_iterator_exact_length(block: ScreenBlockWrapper) {
        let mut it = block.internal_points();
        let mut expected = safe_area(&block);
        assert!(it.len() == expected);
        while it.next().is_some() {
            expected -= 1;
            assert!(it.len() == expected);
            assert!(it.size_hint() == (expected, Some(expected)));
        }
    }

    #[proptest]
    fn tiles_cover_all(block: ScreenBlockWrapper, #[strategy(1u32..=32)] tile_size: u32) {
        let tiles = block.tile_ordering(NonZeroU32::new(tile_size).unwrap());
        check_covers_block(
            tiles.iter().flat_map(|tile| tile.internal_points()),
            &block,
        );
    }

    #[proptest]
    fn tiles_are_ordered_center_out(block: ScreenBlockWrapper, #[strategy(1u32..=32)] tile_size: u32) {
        let center_x = (block.min.x + block.max.x) as i64;
        let center_y = (block.min.y + block.max.y) as i64;
        let distance = |tile: &ScreenBlock| {
            let dx = (tile.min.x + tile.max.x) as i64 - center_x;
            let dy = (tile.min.y + tile.max.y) as i64 - center_y;
            dx * dx + dy * dy
        };

        let tiles = block.tile_ordering(NonZeroU32::new(tile_size).unwrap());
        for pair in tiles.windows(2) {
            assert!(distance(&pair[0]) <= distance(&pair[1]));
        }
    }

    #[test]
    fn single_tile_for_small_block() {
        let block = ScreenBlock::from_size(ScreenSize::new(10, 7));
        let tiles = block.tile_ordering(NonZeroU32::new(16).unwrap());
        assert!(tiles == vec![block]);
    }
}
