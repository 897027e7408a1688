mod machinery;
mod worker;

pub use crate::renderer::machinery::{RenderProgress, render};

use nalgebra::Unit;

use crate::geometry::WorldVector;

#[derive(Copy, Clone, Debug)]
pub struct RenderSettings {
    pub tile_size: std::num::NonZeroU32,
    pub sample_count: std::num::NonZeroU32,
    /// Direction towards the single directional light
    pub light_direction: Unit<WorldVector>,
}
